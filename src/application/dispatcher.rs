//! Dispatcher
//!
//! Routes an instruction to its worker and runs it through the worker port.
//! The outcome is forwarded unchanged, paired with the invocation that
//! produced it.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::invocation::DEFAULT_WORKER_TIMEOUT;
use crate::domain::{route, ProcessOutcome, TradeInstruction, WorkerInvocation, WorkerSettings};
use crate::ports::WorkerPort;

/// Outcome of one dispatch, annotated with the selected worker
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub invocation: WorkerInvocation,
    pub outcome: ProcessOutcome,
}

pub struct Dispatcher {
    settings: WorkerSettings,
    worker: Arc<dyn WorkerPort>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(settings: WorkerSettings, worker: Arc<dyn WorkerPort>) -> Self {
        Self {
            settings,
            worker,
            timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }

    /// Set the default per-invocation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn route(&self, instruction: &TradeInstruction) -> WorkerInvocation {
        route(instruction, &self.settings)
    }

    pub async fn run(&self, instruction: &TradeInstruction) -> DispatchResult {
        self.run_with_timeout(instruction, self.timeout).await
    }

    pub async fn run_with_timeout(
        &self,
        instruction: &TradeInstruction,
        timeout: Duration,
    ) -> DispatchResult {
        let invocation = self.route(instruction);
        tracing::info!(
            worker = %invocation.worker(),
            token_id = instruction.token_id(),
            level = instruction.level(),
            "Dispatching to {}",
            invocation.script().display()
        );

        let outcome = self.worker.invoke(&invocation, timeout).await;
        DispatchResult { invocation, outcome }
    }
}
