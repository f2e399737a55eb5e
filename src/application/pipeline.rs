//! Webhook Pipeline
//!
//! Coordinates one inbound instruction end to end:
//! raw audit append, boundary parsing, safety check, dispatch, and outcome
//! snapshot. The order is fixed; the raw append runs first so instructions
//! that are later rejected still leave a trace.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::adapters::audit::{AuditError, AuditStore, OutcomeSnapshot};
use crate::domain::{
    check, DispatchFailure, DispatchReport, InstructionError, OperatingMode, SafetyLimits,
    SafetyRule, StatusReport, TradeInstruction,
};

use super::dispatcher::Dispatcher;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Malformed instruction: {0}")]
    MalformedInstruction(#[from] InstructionError),

    #[error("Safety check failed: {reason}")]
    PolicyRejected { rule: SafetyRule, reason: String },

    #[error("Dispatch failed: {0}")]
    DispatchFailed(Box<DispatchFailure>),

    #[error("Audit trail could not be persisted: {0}")]
    Persistence(#[from] AuditError),

    #[error("Request task failed: {0}")]
    TaskFailed(String),
}

impl PipelineError {
    /// Short machine-readable label for logs and responses
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedInstruction(_) => "malformed_instruction",
            PipelineError::PolicyRejected { .. } => "policy_rejected",
            PipelineError::DispatchFailed(failure) => failure.kind.as_str(),
            PipelineError::Persistence(_) => "persistence_failure",
            PipelineError::TaskFailed(_) => "task_failure",
        }
    }

    /// Whether the request was stopped before any worker was started
    pub fn rejected_before_dispatch(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedInstruction(_)
                | PipelineError::PolicyRejected { .. }
                | PipelineError::Persistence(_)
        )
    }
}

/// Guarded execution pipeline shared by the webhook handlers
pub struct WebhookPipeline {
    limits: Arc<SafetyLimits>,
    dispatcher: Dispatcher,
    audit: AuditStore,
    mode: OperatingMode,
}

impl WebhookPipeline {
    pub fn new(limits: Arc<SafetyLimits>, dispatcher: Dispatcher, audit: AuditStore) -> Self {
        let mode = OperatingMode::from_dry_run(dispatcher.settings().dry_run);
        Self {
            limits,
            dispatcher,
            audit,
            mode,
        }
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn audit(&self) -> &AuditStore {
        &self.audit
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::new(self.mode, &self.limits)
    }

    /// Process one raw webhook payload
    pub async fn handle(&self, payload: &Value) -> Result<DispatchReport, PipelineError> {
        self.handle_decoded(payload, payload).await
    }

    /// Process a payload decoded from another body encoding. `raw` is what
    /// goes to the audit log, `payload` is what gets parsed.
    pub async fn handle_decoded(
        &self,
        raw: &Value,
        payload: &Value,
    ) -> Result<DispatchReport, PipelineError> {
        tracing::info!("Webhook received: {}", payload);

        if let Err(e) = self.audit.append_raw(raw) {
            tracing::error!("Failed to log request, refusing to continue: {}", e);
            return Err(e.into());
        }

        let instruction = TradeInstruction::from_payload(payload).map_err(|e| {
            tracing::warn!("Rejected malformed instruction: {}", e);
            PipelineError::from(e)
        })?;

        tracing::info!(
            profit = instruction.profit(),
            level = instruction.level(),
            token_id = instruction.token_id(),
            mode = %self.mode,
            "Instruction accepted for safety check"
        );

        if !self.limits.enabled {
            tracing::warn!("Safety checks disabled - instruction passes unchecked");
        }

        let verdict = check(&instruction, &self.limits);
        if let (Some(rule), Some(reason)) = (verdict.rule(), verdict.reason()) {
            tracing::warn!(rule = rule.as_str(), "Safety check failed: {}", reason);
            return Err(PipelineError::PolicyRejected {
                rule,
                reason: reason.to_string(),
            });
        }

        let result = self.dispatcher.run(&instruction).await;

        match DispatchFailure::from_outcome(&instruction, &result.invocation, &result.outcome, self.mode)
        {
            None => {
                let report = DispatchReport::new(&instruction, &result.invocation, self.mode);
                self.record(OutcomeSnapshot::Response(&report));
                Ok(report)
            }
            Some(failure) => {
                tracing::error!("Worker execution failed: {}", failure);
                self.record(OutcomeSnapshot::Error(&failure));
                Err(PipelineError::DispatchFailed(Box::new(failure)))
            }
        }
    }

    /// Snapshot failures are logged and never change the response
    fn record(&self, snapshot: OutcomeSnapshot<'_>) {
        if let Err(e) = self.audit.record_outcome(snapshot) {
            tracing::error!("Failed to save outcome snapshot: {}", e);
        }
    }
}
