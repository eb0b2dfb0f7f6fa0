// src/core/upgrade.rs

//! `i_run_upgrade`: one upgrade file, guarded by the server's upgrade-control
//! record. A file that already ran, or whose control record is missing, is
//! rejected before any of its SQL reaches the server.

use crate::{
    constants::{UPGRADE_CHECK_PROCEDURE, UPGRADE_TABLE},
    core::{
        build_script::{self, ParsedLine},
        context::RunContext,
        orchestrator::{dispatch_runsql, write_changelog},
        script_runner::{fold_execution_error, locate_source, run_sql},
    },
    models::{CommandVariables, RunOutcome},
    system::{
        backend::{execute_once, is_batch_terminator, is_exit_command},
        executor::{ExecutionError, check_for_cancellation},
    },
};
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::{fs, io::Write};

const UPGRADE_PROGRAM: &str = "i_run_upgrade";

lazy_static! {
    static ref USE_RE: Regex = Regex::new(r"(?i)^\s*use\s+([^\s;]+)\s*;?\s*$").unwrap();
    static ref EMBEDDED_RUNSQL_RE: Regex = Regex::new(r"(?i)^\s*(runsql\s.*)!\s*$").unwrap();
    static ref RENAME_RE: Regex = Regex::new(r"(?i)^\s*sp_renametoold\b").unwrap();
}

/// State of the upgrade-control record for one upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpgradeState {
    Pending,
    ControlMissing,
    AlreadyApplied,
}

impl UpgradeState {
    fn from_return_code(code: i32) -> Self {
        match code {
            1 => Self::ControlMissing,
            2 => Self::AlreadyApplied,
            _ => Self::Pending,
        }
    }
}

/// Runs an upgrade file. The audit entry is written when `vars.changelog` is set,
/// which only the top-level invocation does.
pub fn run_upgrade(ctx: &mut RunContext<'_>, vars: &CommandVariables) -> Result<RunOutcome> {
    let Some(id) = vars
        .upgrade_number
        .clone()
        .or_else(|| build_script::upgrade_id_from_path(&vars.source))
    else {
        ctx.report_error(&format!(
            "Cannot determine the upgrade number of '{}'; expected a name like sct_<number>.",
            vars.source
        ));
        return Ok(RunOutcome::failure());
    };

    let path = locate_source(ctx, &vars.source);
    if !path.is_file() {
        ctx.report_error(&format!("Upgrade file not found: '{}'", path.display()));
        return Ok(RunOutcome::failure());
    }

    if !vars.preview {
        let state = match check_upgrade(ctx, &id, vars.database.as_deref()) {
            Ok(state) => state,
            Err(e) => return fold_execution_error(ctx, e),
        };
        match state {
            UpgradeState::ControlMissing => {
                ctx.report_error(&format!("Upgrade control record for upgrade {} is missing.", id));
                return Ok(RunOutcome::failure());
            }
            UpgradeState::AlreadyApplied => {
                ctx.report_error(&format!("Upgrade {} has already been applied.", id));
                return Ok(RunOutcome::failure());
            }
            UpgradeState::Pending => {}
        }
    }

    // Audited only once the upgrade is known to run.
    if vars.changelog && !ctx.env.raw_mode && !vars.preview {
        write_changelog(ctx, UPGRADE_PROGRAM, vars)?;
    }
    log::info!("Running upgrade {} from '{}'", id, path.display());

    let content = match fs::read(&path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            ctx.report_error(&format!("Failed to read '{}': {}", path.display(), e));
            return Ok(RunOutcome::failure());
        }
    };

    let mut stream = UpgradeStream {
        vars,
        database: vars.database.clone(),
        pending: String::new(),
        all_ok: true,
    };
    stream.run(ctx, &content)?;

    if !stream.all_ok {
        ctx.report_error(&format!("Upgrade {} failed; it is not marked as applied.", id));
        return Ok(RunOutcome::failure());
    }
    if !vars.preview {
        mark_applied(ctx, &id, vars.database.as_deref())?;
    }
    Ok(RunOutcome::success())
}

fn check_upgrade(ctx: &RunContext<'_>, id: &str, database: Option<&str>) -> Result<UpgradeState, ExecutionError> {
    let call = ctx.resolve_word(&format!("{} '{}'", UPGRADE_CHECK_PROCEDURE, quote(id)));
    let mut session = scopeguard::guard(ctx.backend.open(database)?, |session| {
        if let Err(e) = session.close() {
            log::warn!("Failed to close connection: {}", e);
        }
    });
    let code = session.exec_return_code(&call)?;
    log::debug!("Upgrade check for {} returned {}", id, code);
    Ok(UpgradeState::from_return_code(code))
}

fn mark_applied(ctx: &mut RunContext<'_>, id: &str, database: Option<&str>) -> Result<()> {
    let statement = format!(
        "update {} set end_dt = getdate() where upgrade_no = '{}'",
        UPGRADE_TABLE,
        quote(id)
    );
    let sql = format!("{}\ngo\n", ctx.resolve_word(&statement));
    match execute_once(ctx.backend, &sql, database, ctx.cancellation_token) {
        Ok(outcome) if outcome.success => Ok(()),
        Ok(outcome) => {
            ctx.report_error(&format!(
                "Upgrade {} ran but its completion was not recorded: {}",
                id,
                outcome.output.trim()
            ));
            Ok(())
        }
        Err(e) => fold_execution_error(ctx, e).map(|_| ()),
    }
}

fn quote(text: &str) -> String {
    text.replace('\'', "''")
}

// --- FILE STREAM ---

/// Walks an upgrade file, tracking the current database and the batch in progress.
struct UpgradeStream<'v> {
    vars: &'v CommandVariables,
    database: Option<String>,
    pending: String,
    all_ok: bool,
}

impl UpgradeStream<'_> {
    fn run(&mut self, ctx: &mut RunContext<'_>, content: &str) -> Result<()> {
        let root = ctx.env.sql_source_root.to_string_lossy().into_owned();

        for line in content.lines() {
            check_for_cancellation(ctx.cancellation_token)?;

            if is_exit_command(line) {
                break;
            }
            if let Some(caps) = USE_RE.captures(line) {
                self.flush(ctx)?;
                let database = ctx.resolve_word(&caps[1]);
                log::debug!("Upgrade switches to database '{}'", database);
                self.database = Some(database);
                continue;
            }
            if let Some(caps) = EMBEDDED_RUNSQL_RE.captures(line) {
                self.flush(ctx)?;
                self.embedded_runsql(ctx, &caps[1], &root)?;
                continue;
            }
            if RENAME_RE.is_match(line) {
                self.flush(ctx)?;
                self.rename(ctx, line)?;
                continue;
            }
            if is_batch_terminator(line) {
                self.flush(ctx)?;
                continue;
            }
            self.pending.push_str(line);
            self.pending.push('\n');
        }
        self.flush(ctx)
    }

    fn record(&mut self, outcome: RunOutcome) {
        self.all_ok &= outcome.is_success();
    }

    /// Runs the accumulated batch through a scratch file so it behaves like any `runsql` source.
    fn flush(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);

        let mut scratch = tempfile::Builder::new()
            .prefix("ibs_upgrade_")
            .suffix(".sql")
            .tempfile()
            .context("Failed to create a scratch file for the upgrade batch")?;
        scratch
            .write_all(batch.as_bytes())
            .and_then(|_| scratch.flush())
            .context("Failed to write the upgrade batch")?;

        let mut nested = self.vars.nested(scratch.path().to_string_lossy().into_owned());
        nested.database = self.database.clone();
        let outcome = run_sql(ctx, &nested)?;
        self.record(outcome);
        Ok(())
    }

    fn embedded_runsql(&mut self, ctx: &mut RunContext<'_>, command: &str, root: &str) -> Result<()> {
        let parsed = {
            let resolver = |text: &str| ctx.resolve_word(text);
            build_script::parse_line(command, &resolver, root)
        };
        let ParsedLine::Command(line) = parsed else {
            log::debug!("Embedded command is inert: {}", command);
            return Ok(());
        };
        let mut inherited = self.vars.nested(self.vars.source.as_str());
        inherited.database = self.database.clone();
        let outcome = dispatch_runsql(ctx, &inherited, &line)?;
        self.record(outcome);
        Ok(())
    }

    fn rename(&mut self, ctx: &mut RunContext<'_>, line: &str) -> Result<()> {
        let sql = format!("{}\ngo\n", ctx.resolve_word(line.trim()));
        if self.vars.preview {
            ctx.emit(&sql);
            return Ok(());
        }
        let outcome = match execute_once(ctx.backend, &sql, self.database.as_deref(), ctx.cancellation_token) {
            Ok(outcome) => {
                ctx.emit(&outcome.output);
                RunOutcome::from_success(outcome.success)
            }
            Err(e) => fold_execution_error(ctx, e)?,
        };
        if !outcome.is_success() {
            ctx.report_error(&format!("'{}' failed.", line.trim()));
        }
        self.record(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    const UPGRADE: &str = "use &dbtbl&\ngo\ncreate table x (a int)\ngo\nsp_renametoold &users&\nupdate x set a = 1\ngo\n";

    fn vars(source: &str) -> CommandVariables {
        CommandVariables {
            source: source.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_upgrade_runs_in_order_and_records_completion() {
        let mut fx = Fixture::new();
        let path = fx.write("css/upgrades/sct_4711.sql", UPGRADE);

        let outcome = run_upgrade(&mut fx.ctx(), &vars(&path.to_string_lossy())).unwrap();

        assert!(outcome.is_success());
        assert_eq!(
            fx.backend.executed_sql(),
            vec![
                "create table x (a int)\n",
                "sp_renametoold sbnmaster..users\n",
                "update x set a = 1\n",
                "update &ba_upgrades& set end_dt = getdate() where upgrade_no = '4711'\n",
            ]
        );
        let state = fx.backend.state();
        assert_eq!(state.executed[0].0.as_deref(), Some("sbnmaster"));
        assert_eq!(state.executed[3].0, None);
        assert_eq!(state.calls, vec!["&i_upgrade_check& '4711'"]);
    }

    #[test]
    fn test_second_run_is_rejected_without_sql() {
        let mut fx = Fixture::new();
        let path = fx.write("css/upgrades/sct_4711.sql", UPGRADE);
        let mut v = vars(&path.to_string_lossy());
        v.changelog = true;
        v.command_line = "i_run_upgrade sct_4711.sql".to_string();

        assert!(run_upgrade(&mut fx.ctx(), &v).unwrap().is_success());
        let executed = fx.backend.executed_sql().len();

        let outcome = run_upgrade(&mut fx.ctx(), &v).unwrap();

        assert!(!outcome.is_success());
        assert_eq!(fx.backend.executed_sql().len(), executed);
        assert!(fx.printed().contains("Upgrade 4711 has already been applied."));
    }

    #[test]
    fn test_missing_control_record_is_fatal() {
        let mut fx = Fixture::new();
        fx.backend.set_upgrade_control_missing();
        let path = fx.write("css/upgrades/sct_12.sql", UPGRADE);
        let mut v = vars(&path.to_string_lossy());
        v.changelog = true;

        let outcome = run_upgrade(&mut fx.ctx(), &v).unwrap();

        assert!(!outcome.is_success());
        assert!(fx.backend.executed_sql().is_empty());
        assert!(fx.printed().contains("control record for upgrade 12 is missing"));
    }

    #[test]
    fn test_embedded_runsql_uses_its_own_sequence() {
        let mut fx = Fixture::new();
        fx.write("css/seed.sql", "insert s values (@sequence@)\n");
        let path = fx.write(
            "css/upgrades/sct_9.sql",
            "use sbnreport\nrunsql $ir>css>seed.sql -F1 -L2!\n",
        );

        let outcome = run_upgrade(&mut fx.ctx(), &vars(&path.to_string_lossy())).unwrap();

        assert!(outcome.is_success());
        let state = fx.backend.state();
        assert_eq!(state.executed[0], (Some("sbnreport".to_string()), "insert s values (1)\n".to_string()));
        assert_eq!(state.executed[1].1, "insert s values (2)\n");
    }

    #[test]
    fn test_failed_upgrade_is_not_marked_applied() {
        let mut fx = Fixture::new();
        fx.backend.fail_on("create table");
        let path = fx.write("css/upgrades/sct_4711.sql", UPGRADE);

        let outcome = run_upgrade(&mut fx.ctx(), &vars(&path.to_string_lossy())).unwrap();

        assert!(!outcome.is_success());
        assert!(!fx.backend.executed_sql().iter().any(|sql| sql.contains("end_dt")));
        assert!(fx.backend.state().applied_upgrades.is_empty());
    }

    #[test]
    fn test_top_level_upgrade_is_audited_as_upgrade() {
        let mut fx = Fixture::new();
        let path = fx.write("css/upgrades/sct_5.sql", "select 1\n");
        let mut v = vars(&path.to_string_lossy());
        v.changelog = true;
        v.command_line = "i_run_upgrade sct_5.sql".to_string();

        let _ = run_upgrade(&mut fx.ctx(), &v).unwrap();

        let executed = fx.backend.executed_sql();
        assert!(executed[0].contains("@program = 'UPGRADE'"));
        assert_eq!(executed.iter().filter(|sql| sql.contains("&i_changelog&")).count(), 1);
    }

    #[test]
    fn test_name_without_upgrade_number_is_rejected() {
        let mut fx = Fixture::new();
        let path = fx.write("css/upgrades/plain.sql", "select 1\n");
        let outcome = run_upgrade(&mut fx.ctx(), &vars(&path.to_string_lossy())).unwrap();
        assert!(!outcome.is_success());
        assert!(fx.backend.state().calls.is_empty());
    }
}
