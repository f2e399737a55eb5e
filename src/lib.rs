//! Buy Relay - Guarded Webhook Trade Dispatcher
//!
//! Accepts buy instructions over a webhook, enforces profit, level and token
//! limits, and runs the matching buy worker as a child process with a bounded
//! lifetime. Every request leaves an audit record.
//!
//! # Modules
//!
//! - `domain`: Instructions, safety policy, routing and outcome documents
//! - `ports`: Trait abstractions (WorkerPort) and test doubles
//! - `adapters`: External implementations (process runner, audit store, HTTP, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Dispatcher and webhook pipeline

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
