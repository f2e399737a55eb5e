//! HTTP Adapter
//!
//! Webhook, status and banner endpoints served with axum.

mod server;

pub use server::{decode_body, root, router, serve, status, webhook, AppState, WebhookBody};
