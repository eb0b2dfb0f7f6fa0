// src/core/mod.rs

//! Soft-compiler, runners and orchestration.

pub mod build_script;
pub mod cache;
pub mod compilers;
pub mod context;
pub mod option_file;
pub mod options;
pub mod orchestrator;
pub mod paths;
pub mod profile;
pub mod script_runner;
pub mod upgrade;
