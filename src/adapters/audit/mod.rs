//! Audit Adapter
//!
//! Raw request log and last-outcome snapshots on the local filesystem.

mod store;

pub use store::{
    AuditError, AuditStore, OutcomeSnapshot, RawLogEntry, LAST_ERROR_FILE, LAST_RESPONSE_FILE,
    REQUEST_LOG_FILE,
};
