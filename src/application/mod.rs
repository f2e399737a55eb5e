//! Application Layer - Use cases built on domain and ports
//!
//! `dispatcher` selects and runs a worker; `pipeline` wraps it with the raw
//! audit log, the safety gate and outcome snapshots.

pub mod dispatcher;
pub mod pipeline;

pub use dispatcher::{DispatchResult, Dispatcher};
pub use pipeline::{PipelineError, WebhookPipeline};
