//! Domain Layer - Core logic for the buy relay
//!
//! Pure types and rules with no I/O. All process and filesystem interaction
//! happens through the ports layer.
//!
//! - `instruction`: Boundary parsing of webhook payloads
//! - `safety`: Profit, level and token limits
//! - `invocation`: Level-based worker routing
//! - `outcome`: Terminal worker results
//! - `report`: Response and snapshot documents

pub mod instruction;
pub mod safety;
pub mod invocation;
pub mod outcome;
pub mod report;

pub use instruction::{InstructionError, TradeInstruction};
pub use safety::{check, SafetyLimits, SafetyRule, SafetyVerdict};
pub use invocation::{route, WorkerInvocation, WorkerKind, WorkerSettings};
pub use outcome::{DispatchFailureKind, FailureCause, ProcessOutcome};
pub use report::{DispatchFailure, DispatchReport, InstructionParams, OperatingMode, StatusReport};
