// src/cli/handlers/isqlline.rs

//! `isqlline`: one inline command.

use crate::{
    CancellationToken,
    cli::{args::InlineArgs, handlers::commons, normalize_legacy_args},
    core::script_runner,
    models::CommandVariables,
};
use anyhow::Result;
use clap::Parser;

/// `isqlline "<command>" [database] [profile]`. Never audited.
pub fn handle(args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let inline_args = InlineArgs::try_parse_from(normalize_legacy_args(args))?;
    let vars = CommandVariables {
        source: inline_args.command.clone(),
        database: inline_args.database(),
        echo_input: inline_args.echo,
        preview: inline_args.preview,
        ..Default::default()
    };

    let mut invocation =
        commons::Invocation::prepare(inline_args.profile.as_deref(), &inline_args.connection, cancellation_token)?;
    let outcome = script_runner::run_inline(&mut invocation.context(), &vars)?;
    invocation.finish(outcome)
}
