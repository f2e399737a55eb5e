use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::worker::WorkerPort;
use crate::domain::{ProcessOutcome, WorkerInvocation};

/// Mock worker that records invocations and returns a configured outcome
#[derive(Debug, Clone)]
pub struct MockWorker {
    calls: Arc<Mutex<Vec<(WorkerInvocation, Duration)>>>,
    outcome: Arc<Mutex<ProcessOutcome>>,
}

impl Default for MockWorker {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            outcome: Arc::new(Mutex::new(ProcessOutcome::Success {
                stdout: "OK\n".to_string(),
                stderr: String::new(),
            })),
        }
    }
}

impl MockWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the outcome every invocation returns
    pub fn with_outcome(self, outcome: ProcessOutcome) -> Self {
        *self.outcome.lock().unwrap() = outcome;
        self
    }

    /// Get all recorded invocations
    pub fn get_calls(&self) -> Vec<WorkerInvocation> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(invocation, _)| invocation.clone())
            .collect()
    }

    /// Timeouts passed with each invocation
    pub fn get_timeouts(&self) -> Vec<Duration> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkerPort for MockWorker {
    async fn invoke(&self, invocation: &WorkerInvocation, timeout: Duration) -> ProcessOutcome {
        self.calls.lock().unwrap().push((invocation.clone(), timeout));
        self.outcome.lock().unwrap().clone()
    }
}
