use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{ProcessOutcome, WorkerInvocation};

/// Runs a worker command to a terminal outcome.
///
/// Implementations never return an error: spawn failures, non-zero exits and
/// timeouts are all expressed as [`ProcessOutcome`] variants.
#[async_trait]
pub trait WorkerPort: Send + Sync {
    async fn invoke(&self, invocation: &WorkerInvocation, timeout: Duration) -> ProcessOutcome;
}
