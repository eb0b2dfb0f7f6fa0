// src/cli/handlers/bulk.rs

//! `bcp`: one table to or from a tab-delimited file.

use crate::{
    CancellationToken,
    cli::{args::BulkArgs, handlers::commons, normalize_legacy_args},
    core::paths,
    models::RunOutcome,
    system::bulk::{BulkDirection, bulk_copy},
};
use anyhow::{Context, Result, anyhow};
use clap::Parser;

/// `bcp <table> <in|out> <file> [profile] [-D database]`
pub fn handle(args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let bulk_args = BulkArgs::try_parse_from(normalize_legacy_args(args))?;
    let direction = bulk_args.direction.parse::<BulkDirection>().map_err(|e| anyhow!(e))?;
    let data_file = paths::expand_user_path(&bulk_args.file)?;

    let mut invocation =
        commons::Invocation::prepare(bulk_args.profile.as_deref(), &bulk_args.connection, cancellation_token)?;
    let table = invocation.context().resolve_word(&bulk_args.table);

    let copied = {
        let mut session = scopeguard::guard(invocation.backend.open(bulk_args.database.as_deref())?, |session| {
            if let Err(e) = session.close() {
                log::warn!("Failed to close connection: {}", e);
            }
        });
        bulk_copy(session.as_mut(), &table, direction, &data_file, &mut |count: u64| {
            log::info!("{}: {} rows copied", table, count);
        })
        .with_context(|| format!("Bulk copy of {} failed", table))?
    };

    invocation
        .output
        .line(&format!("{} row(s) copied for {}.", copied, table))
        .context("Failed to write output")?;
    invocation.finish(RunOutcome::success())
}
