//! `renderpool-worker` library crate.
//!
//! Re-exports the dispatcher, queue and configuration modules for
//! integration testing. The binary entrypoint lives in `main.rs`.

pub mod config;
pub mod dispatcher;
pub mod queue;
