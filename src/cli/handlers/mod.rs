// src/cli/handlers/mod.rs

//! One module per command; each exposes `handle(args, token)`.

pub mod bulk;
pub mod commons;
pub mod isqlline;
pub mod runcreate;
pub mod runsql;
pub mod upgrade;
