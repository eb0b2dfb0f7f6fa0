// src/cli/handlers/runcreate.rs

//! `runcreate`: a build script.

use crate::{
    CancellationToken,
    cli::{args::ScriptArgs, handlers::commons, normalize_legacy_args},
    core::orchestrator,
};
use anyhow::Result;
use clap::Parser;

/// `runcreate <build script> [database] [profile]`
pub fn handle(args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let command_line = commons::command_line("runcreate", &args);
    let script_args = ScriptArgs::try_parse_from(normalize_legacy_args(args))?;
    let vars = commons::script_variables(&script_args, command_line)?;

    let mut invocation =
        commons::Invocation::prepare(script_args.profile.as_deref(), &script_args.connection, cancellation_token)?;
    let outcome = orchestrator::run_create(&mut invocation.context(), &vars)?;
    invocation.finish(outcome)
}
