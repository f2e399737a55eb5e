//! Ports Layer - Trait definitions for external dependencies
//!
//! Following hexagonal architecture, the pipeline reaches worker processes
//! only through [`WorkerPort`]. `mocks` provides a recording test double.

pub mod worker;
pub mod mocks;

pub use worker::WorkerPort;
pub use mocks::MockWorker;
