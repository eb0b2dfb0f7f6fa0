//! Soft-compiler and build orchestration for IBS SQL sources.
//!
//! Environment-agnostic SQL is resolved through a hierarchical placeholder
//! dictionary (the option set) and executed against Sybase ASE or MSSQL.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Shared interrupt flag, set from the Ctrl+C handler and polled between batches.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;

#[cfg(test)]
pub(crate) mod testing;
