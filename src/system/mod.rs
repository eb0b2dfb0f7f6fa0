//! # System Interaction Layer
//!
//! Everything that talks to a database server or to the operating system.
//!
//! ## Modules
//!
//! - **`backend`**: The `Backend`/`Session` contract shared by both platforms, GO-batch
//!   splitting and the single-shot `execute_once`.
//! - **`mssql`**: MSSQL over TDS.
//! - **`sybase`**: Sybase ASE through persistent `isql` sessions and `bcp`.
//! - **`bulk`**: Tab-delimited bulk load/unload on top of any session.
//! - **`executor`**: Spawning vendor clients with cancellation support.
//! - **`output`**: The console or `-O` file that results are written to.
//! - **`render`**: Tabular rendering of result sets.

pub mod backend;
pub mod bulk;
pub mod executor;
pub mod mssql;
pub mod output;
pub mod render;
pub mod sybase;
