//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits and the outer
//! surfaces of the relay:
//! - Process: Worker child processes with timeout enforcement
//! - Audit: Raw request log and outcome snapshots on disk
//! - HTTP: Webhook server (axum)
//! - CLI: Command-line interface handlers

pub mod process;
pub mod audit;
pub mod http;
pub mod cli;

pub use process::ProcessRunner;
pub use audit::AuditStore;
pub use http::AppState;
pub use cli::CliApp;
