//! Process Adapter
//!
//! Runs worker scripts as supervised child processes with a wall-clock
//! timeout. Implements [`crate::ports::WorkerPort`].

mod runner;

pub use runner::{ProcessRunner, DEFAULT_KILL_GRACE};
