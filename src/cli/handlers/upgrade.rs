// src/cli/handlers/upgrade.rs

//! `i_run_upgrade`: one upgrade file.

use crate::{
    CancellationToken,
    cli::{args::ScriptArgs, handlers::commons, normalize_legacy_args},
    core::{build_script::upgrade_id_from_path, upgrade},
};
use anyhow::{Result, anyhow};
use clap::Parser;

/// `i_run_upgrade <sct_<n> file> [database] [profile]`
pub fn handle(args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let command_line = commons::command_line("i_run_upgrade", &args);
    let script_args = ScriptArgs::try_parse_from(normalize_legacy_args(args))?;
    let mut vars = commons::script_variables(&script_args, command_line)?;
    vars.upgrade_number = Some(upgrade_id_from_path(&vars.source).ok_or_else(|| {
        anyhow!(
            "Cannot determine the upgrade number of '{}'; expected a name like sct_<number>.",
            vars.source
        )
    })?);

    let mut invocation =
        commons::Invocation::prepare(script_args.profile.as_deref(), &script_args.connection, cancellation_token)?;
    let outcome = upgrade::run_upgrade(&mut invocation.context(), &vars)?;
    invocation.finish(outcome)
}
