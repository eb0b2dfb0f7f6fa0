// src/cli/handlers/runsql.rs

//! `runsql`: one SQL script.

use crate::{
    CancellationToken,
    cli::{args::ScriptArgs, handlers::commons, normalize_legacy_args},
    core::script_runner,
};
use anyhow::Result;
use clap::Parser;

/// `runsql <source> [database] [profile] [-F n] [-L n] [-e] ...`
pub fn handle(args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let command_line = commons::command_line("runsql", &args);
    let script_args = ScriptArgs::try_parse_from(normalize_legacy_args(args))?;
    let vars = commons::script_variables(&script_args, command_line)?;

    let mut invocation =
        commons::Invocation::prepare(script_args.profile.as_deref(), &script_args.connection, cancellation_token)?;
    let outcome = script_runner::run_sql(&mut invocation.context(), &vars)?;
    invocation.finish(outcome)
}
