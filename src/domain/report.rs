//! Dispatch Reports
//!
//! Response documents returned to the webhook caller. The same documents are
//! persisted as the "last response" and "last error" snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::instruction::TradeInstruction;
use super::invocation::{WorkerInvocation, WorkerKind};
use super::outcome::{DispatchFailureKind, ProcessOutcome};
use super::safety::SafetyLimits;

/// Whether workers trade for real
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatingMode {
    Live,
    DryRun,
}

impl OperatingMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            OperatingMode::DryRun
        } else {
            OperatingMode::Live
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Live => "live",
            OperatingMode::DryRun => "dry-run",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            OperatingMode::Live => "LIVE trading - workers place real orders",
            OperatingMode::DryRun => "Dry run - workers calculate without trading",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Original instruction parameters echoed back in every report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionParams {
    pub token_id: String,
    pub profit: String,
    pub level: i64,
}

impl From<&TradeInstruction> for InstructionParams {
    fn from(instruction: &TradeInstruction) -> Self {
        Self {
            token_id: instruction.token_id().to_string(),
            profit: instruction.profit().to_string(),
            level: instruction.level(),
        }
    }
}

/// Successful dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub success: bool,
    pub message: String,
    pub worker: WorkerKind,
    pub script: String,
    pub script_result: String,
    pub parameters: InstructionParams,
    pub mode: OperatingMode,
    pub timestamp: DateTime<Utc>,
}

impl DispatchReport {
    pub fn new(
        instruction: &TradeInstruction,
        invocation: &WorkerInvocation,
        mode: OperatingMode,
    ) -> Self {
        Self {
            success: true,
            message: "Request received and processed".to_string(),
            worker: invocation.worker(),
            script: invocation.script().display().to_string(),
            script_result: "completed".to_string(),
            parameters: instruction.into(),
            mode,
            timestamp: Utc::now(),
        }
    }
}

/// Failed dispatch (spawn failure, non-zero exit or timeout)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub success: bool,
    pub message: String,
    pub error: String,
    pub kind: DispatchFailureKind,
    pub worker: WorkerKind,
    pub script: String,
    /// Worker stdout captured before the failure
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    pub parameters: InstructionParams,
    pub mode: OperatingMode,
    pub timestamp: DateTime<Utc>,
}

impl DispatchFailure {
    /// Build from a failed outcome; `None` if the outcome was a success
    pub fn from_outcome(
        instruction: &TradeInstruction,
        invocation: &WorkerInvocation,
        outcome: &ProcessOutcome,
        mode: OperatingMode,
    ) -> Option<Self> {
        let kind = outcome.failure_kind()?;
        let error = outcome.detail().unwrap_or_else(|| "unknown error".to_string());

        Some(Self {
            success: false,
            message: "Worker execution failed".to_string(),
            error,
            kind,
            worker: invocation.worker(),
            script: invocation.script().display().to_string(),
            output: outcome.stdout().to_string(),
            parameters: instruction.into(),
            mode,
            timestamp: Utc::now(),
        })
    }
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} worker {}: {}", self.worker, self.kind, self.error)
    }
}

/// Read-only service status
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub server: String,
    pub mode: OperatingMode,
    pub safety_limits: SafetyLimits,
    pub timestamp: DateTime<Utc>,
}

impl StatusReport {
    pub fn new(mode: OperatingMode, limits: &SafetyLimits) -> Self {
        Self {
            server: "running".to_string(),
            mode,
            safety_limits: limits.clone(),
            timestamp: Utc::now(),
        }
    }
}
