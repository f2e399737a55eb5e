//! Process Outcome
//!
//! Terminal result of one worker invocation. Exactly one variant is produced
//! per invocation and captured output rides along with every variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a worker failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "detail")]
pub enum FailureCause {
    /// Worker ran and exited non-zero
    ExitCode(i32),
    /// Worker ended without an exit code (killed by a signal)
    Terminated,
    /// Waiting on the worker failed after it started
    Wait(String),
    /// Worker could not be started
    Spawn(String),
}

/// Coarse failure classification reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchFailureKind {
    SpawnFailure,
    WorkerFailure,
    Timeout,
}

impl DispatchFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchFailureKind::SpawnFailure => "spawn_failure",
            DispatchFailureKind::WorkerFailure => "worker_failure",
            DispatchFailureKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for DispatchFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success {
        stdout: String,
        stderr: String,
    },
    Failure {
        cause: FailureCause,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        after: Duration,
        stdout: String,
        stderr: String,
    },
}

impl ProcessOutcome {
    pub fn spawn_failure(message: impl Into<String>) -> Self {
        ProcessOutcome::Failure {
            cause: FailureCause::Spawn(message.into()),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success { .. })
    }

    pub fn stdout(&self) -> &str {
        match self {
            ProcessOutcome::Success { stdout, .. }
            | ProcessOutcome::Failure { stdout, .. }
            | ProcessOutcome::TimedOut { stdout, .. } => stdout,
        }
    }

    pub fn stderr(&self) -> &str {
        match self {
            ProcessOutcome::Success { stderr, .. }
            | ProcessOutcome::Failure { stderr, .. }
            | ProcessOutcome::TimedOut { stderr, .. } => stderr,
        }
    }

    /// Failure classification; `None` for success
    pub fn failure_kind(&self) -> Option<DispatchFailureKind> {
        match self {
            ProcessOutcome::Success { .. } => None,
            ProcessOutcome::Failure {
                cause: FailureCause::Spawn(_),
                ..
            } => Some(DispatchFailureKind::SpawnFailure),
            ProcessOutcome::Failure { .. } => Some(DispatchFailureKind::WorkerFailure),
            ProcessOutcome::TimedOut { .. } => Some(DispatchFailureKind::Timeout),
        }
    }

    /// Primary diagnostic for a failed invocation.
    ///
    /// Non-zero exits report stderr, falling back to the exit code when the
    /// worker printed nothing on stderr.
    pub fn detail(&self) -> Option<String> {
        match self {
            ProcessOutcome::Success { .. } => None,
            ProcessOutcome::Failure { cause, stderr, .. } => {
                let stderr = stderr.trim();
                Some(match cause {
                    FailureCause::Spawn(message) => format!("Failed to start worker: {}", message),
                    _ if !stderr.is_empty() => stderr.to_string(),
                    FailureCause::ExitCode(code) => format!("exit code {}", code),
                    FailureCause::Terminated => "worker terminated by signal".to_string(),
                    FailureCause::Wait(message) => format!("Failed to wait for worker: {}", message),
                })
            }
            ProcessOutcome::TimedOut { after, .. } => Some(format!(
                "Worker timed out after {}s and was terminated",
                after.as_secs()
            )),
        }
    }
}
