//! # Script Runner
//!
//! `runsql` runs one SQL source file, optionally once per value of a
//! `-F`/`-L` sequence range; `isqlline` runs one inline command.
//!
//! Each sequence iteration gets its own connection, kept open across all of
//! that iteration's batches so `use` and temp tables carry over. A failed
//! batch marks the run failed without stopping the batches after it.

use crate::{
    core::{
        context::{RunContext, changelog_statement},
        paths::{expand_ir_marker, expand_symbolic_path},
    },
    models::{CommandVariables, RunOutcome},
    system::{
        backend::{execute_once, is_batch_terminator, is_exit_command, run_batches, split_batches},
        executor::{ExecutionError, check_for_cancellation},
    },
};
use anyhow::Result;
use std::{fmt::Write as _, fs, path::PathBuf};

/// Program name recorded in the changelog for `runsql`.
const RUNSQL_PROGRAM: &str = "runsql";

/// Resolves a source reference to a file path: placeholders, `$ir`, symbolic segments.
pub fn locate_source(ctx: &RunContext<'_>, source: &str) -> PathBuf {
    let resolved = ctx.resolve_word(source.trim());
    let root = ctx.env.sql_source_root.to_string_lossy();
    expand_symbolic_path(&expand_ir_marker(&resolved, &root))
}

/// Folds an execution error into the run. Only cancellation escapes.
pub(crate) fn fold_execution_error(ctx: &mut RunContext<'_>, error: ExecutionError) -> Result<RunOutcome> {
    match error {
        ExecutionError::Cancelled => Err(error.into()),
        other => {
            ctx.report_error(&other.to_string());
            Ok(RunOutcome::failure())
        }
    }
}

/// `runsql`: runs a source file once per sequence value.
pub fn run_sql(ctx: &mut RunContext<'_>, vars: &CommandVariables) -> Result<RunOutcome> {
    if let Some(range) = vars.sequence {
        if range.first > range.last {
            ctx.report_error(&format!(
                "Invalid sequence range: first ({}) is greater than last ({}).",
                range.first, range.last
            ));
            return Ok(RunOutcome::failure());
        }
    }

    let path = locate_source(ctx, &vars.source);
    if !path.is_file() {
        ctx.report_error(&format!("Source file not found: '{}'", path.display()));
        return Ok(RunOutcome::failure());
    }
    let content = match fs::read(&path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            ctx.report_error(&format!("Failed to read '{}': {}", path.display(), e));
            return Ok(RunOutcome::failure());
        }
    };
    log::debug!("runsql '{}' on {:?}", path.display(), vars.database);

    let audit = (vars.changelog && !ctx.env.raw_mode)
        .then(|| changelog_statement(RUNSQL_PROGRAM, &vars.command_line, &ctx.env.user));

    let iterations: Box<dyn Iterator<Item = Option<i64>>> = match vars.sequence {
        Some(range) => Box::new((range.first..=range.last).map(Some)),
        None => Box::new(std::iter::once(None)),
    };

    let mut all_ok = true;
    for sequence in iterations {
        check_for_cancellation(ctx.cancellation_token)?;
        let sql = compose_script(ctx, &content, sequence, audit.as_deref());

        if vars.preview {
            ctx.emit(&sql);
            continue;
        }

        match execute_script(ctx, &sql, vars.database.as_deref(), vars.echo_input, audit.is_some()) {
            Ok(ok) => all_ok &= ok,
            Err(e) => {
                let outcome = fold_execution_error(ctx, e)?;
                all_ok &= outcome.is_success();
            }
        }
    }

    Ok(RunOutcome::from_success(all_ok))
}

/// Audit lines, resolved source lines up to `exit`/`quit`, trailing terminator.
fn compose_script(ctx: &RunContext<'_>, content: &str, sequence: Option<i64>, audit: Option<&str>) -> String {
    let mut sql = String::with_capacity(content.len() + 128);
    if let Some(statement) = audit {
        let _ = writeln!(sql, "{}", ctx.resolve(statement, sequence));
        sql.push_str("go\n");
    }

    for line in content.lines() {
        if is_exit_command(line) {
            break;
        }
        let _ = writeln!(sql, "{}", ctx.resolve(line, sequence));
    }

    if !sql.lines().last().is_some_and(is_batch_terminator) {
        sql.push_str("go\n");
    }

    if !ctx.env.raw_mode {
        let unresolved = ctx.options.unresolved_placeholders(&sql);
        if !unresolved.is_empty() {
            log::debug!("Unresolved placeholders left as is: {}", unresolved.join(", "));
        }
    }
    sql
}

/// Runs every batch of `sql` on one connection. Returns whether all succeeded.
fn execute_script(
    ctx: &mut RunContext<'_>,
    sql: &str,
    database: Option<&str>,
    echo: bool,
    has_audit: bool,
) -> Result<bool, ExecutionError> {
    let batches = split_batches(sql);
    let backend = ctx.backend;
    let token = ctx.cancellation_token;
    let mut session = scopeguard::guard(backend.open(database)?, |session| {
        if let Err(e) = session.close() {
            log::warn!("Failed to close connection: {}", e);
        }
    });

    let results = run_batches(session.as_mut(), &batches, token, |index, batch, result| {
        if echo {
            let numbered: String = batch
                .lines()
                .enumerate()
                .map(|(n, line)| format!("{}> {}\n", n + 1, line))
                .collect();
            ctx.emit(&numbered);
        }
        match result {
            Ok(output) => ctx.emit(&output.text),
            Err(e) => ctx.report_error(&e.full_text()),
        }
        if echo && has_audit && index == 0 {
            ctx.emit("\n");
        }
    })?;

    Ok(results.iter().all(Result::is_ok))
}

/// `isqlline`: resolves and runs one inline command. Never audited.
pub fn run_inline(ctx: &mut RunContext<'_>, vars: &CommandVariables) -> Result<RunOutcome> {
    let command = ctx.resolve_word(&vars.source);
    let sql = format!("{}\ngo\n", command.trim_end());

    if vars.echo_input {
        ctx.emit(&command);
    }
    if vars.preview {
        ctx.emit(&sql);
        return Ok(RunOutcome::success());
    }

    match execute_once(ctx.backend, &sql, vars.database.as_deref(), ctx.cancellation_token) {
        Ok(outcome) => {
            ctx.emit(&outcome.output);
            if !outcome.success {
                ctx.report_error("One or more batches failed.");
            }
            Ok(RunOutcome::from_success(outcome.success))
        }
        Err(e) => fold_execution_error(ctx, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SequenceRange;
    use crate::testing::Fixture;

    fn vars(source: &str) -> CommandVariables {
        CommandVariables {
            source: source.to_string(),
            database: Some("sbnmaster".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_placeholders_are_resolved_before_execution() {
        let mut fx = Fixture::new();
        let path = fx.write("sql/a.sql", "select * from &users&\ngo\n");
        let outcome = run_sql(&mut fx.ctx(), &vars(&path.to_string_lossy())).unwrap();

        assert!(outcome.is_success());
        assert_eq!(fx.backend.executed_sql(), vec!["select * from sbnmaster..users\n"]);
        assert_eq!(fx.backend.state().opened, vec![Some("sbnmaster".to_string())]);
        assert_eq!(fx.backend.state().closed, 1);
    }

    #[test]
    fn test_failed_batch_marks_run_failed_but_later_batches_run() {
        let mut fx = Fixture::new();
        fx.backend.fail_on("batch_a");
        let path = fx.write("sql/ab.sql", "exec batch_a\ngo\nexec batch_b\ngo\n");

        let outcome = run_sql(&mut fx.ctx(), &vars(&path.to_string_lossy())).unwrap();

        assert!(!outcome.is_success());
        let executed = fx.backend.executed_sql();
        assert_eq!(executed.len(), 2);
        assert!(executed[1].contains("batch_b"));
        assert!(fx.printed().contains("Error: "));
    }

    #[test]
    fn test_sequence_runs_each_value_on_its_own_connection() {
        let mut fx = Fixture::new();
        let path = fx.write("sql/seq.sql", "insert t values (@sequence@)\n");
        let mut v = vars(&path.to_string_lossy());
        v.sequence = Some(SequenceRange::new(2, 4));

        let outcome = run_sql(&mut fx.ctx(), &v).unwrap();

        assert!(outcome.is_success());
        assert_eq!(
            fx.backend.executed_sql(),
            vec!["insert t values (2)\n", "insert t values (3)\n", "insert t values (4)\n"]
        );
        assert_eq!(fx.backend.state().opened.len(), 3);
    }

    #[test]
    fn test_inverted_sequence_is_rejected() {
        let mut fx = Fixture::new();
        let path = fx.write("sql/seq.sql", "select 1\n");
        let mut v = vars(&path.to_string_lossy());
        v.sequence = Some(SequenceRange::new(5, 1));

        let outcome = run_sql(&mut fx.ctx(), &v).unwrap();
        assert!(!outcome.is_success());
        assert!(fx.backend.executed_sql().is_empty());
    }

    #[test]
    fn test_exit_line_stops_reading_the_source() {
        let mut fx = Fixture::new();
        let path = fx.write("sql/exit.sql", "select 1\ngo\nquit\nselect 2\ngo\n");
        let _ = run_sql(&mut fx.ctx(), &vars(&path.to_string_lossy())).unwrap();
        assert_eq!(fx.backend.executed_sql(), vec!["select 1\n"]);
    }

    #[test]
    fn test_changelog_is_the_first_batch_with_blank_separator_when_echoing() {
        let mut fx = Fixture::new();
        let path = fx.write("sql/a.sql", "select 1\n");
        let mut v = vars(&path.to_string_lossy());
        v.changelog = true;
        v.echo_input = true;
        v.command_line = "runsql a.sql -P secret".to_string();

        let _ = run_sql(&mut fx.ctx(), &v).unwrap();

        let executed = fx.backend.executed_sql();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].contains("@program = 'RUNSQL'"));
        assert!(executed[0].contains("-P ****"));
        let printed = fx.printed();
        assert!(printed.contains("@user_name = 'sa'\nok: exec"));
        assert!(printed.contains("\n\n1> select 1\n"), "blank line separates the audit batch: {}", printed);
        assert_eq!(printed.matches("\n\n").count(), 1);
    }

    #[test]
    fn test_preview_writes_resolved_text_without_executing() {
        let mut fx = Fixture::new();
        let path = fx.write("sql/a.sql", "select * from &users&\n");
        let mut v = vars(&path.to_string_lossy());
        v.preview = true;

        let outcome = run_sql(&mut fx.ctx(), &v).unwrap();

        assert!(outcome.is_success());
        assert!(fx.backend.executed_sql().is_empty());
        assert!(fx.backend.state().opened.is_empty());
        assert_eq!(fx.printed(), "select * from sbnmaster..users\ngo\n");
    }

    #[test]
    fn test_raw_mode_runs_text_verbatim_without_audit() {
        let mut fx = Fixture::new();
        fx.env.raw_mode = true;
        let path = fx.write("sql/a.sql", "select * from &users&\n");
        let mut v = vars(&path.to_string_lossy());
        v.changelog = true;

        let _ = run_sql(&mut fx.ctx(), &v).unwrap();
        assert_eq!(fx.backend.executed_sql(), vec!["select * from &users&\n"]);
    }

    #[test]
    fn test_missing_source_is_reported_with_path() {
        let mut fx = Fixture::new();
        let outcome = run_sql(&mut fx.ctx(), &vars("/nowhere/missing.sql")).unwrap();
        assert!(!outcome.is_success());
        assert!(fx.printed().contains("/nowhere/missing.sql"));
    }

    #[test]
    fn test_ir_marker_locates_source_under_root() {
        let mut fx = Fixture::new();
        fx.write("css/x/a.sql", "select 1\n");
        let outcome = run_sql(&mut fx.ctx(), &vars("$ir>css>x>a.sql")).unwrap();
        assert!(outcome.is_success());
        assert_eq!(fx.backend.executed_sql().len(), 1);
    }

    #[test]
    fn test_cancellation_propagates() {
        let mut fx = Fixture::new();
        let path = fx.write("sql/a.sql", "select 1\n");
        fx.token.store(true, std::sync::atomic::Ordering::SeqCst);
        let result = run_sql(&mut fx.ctx(), &vars(&path.to_string_lossy()));
        assert!(result.is_err());
        assert!(fx.backend.executed_sql().is_empty());
    }

    #[test]
    fn test_huge_sequence_is_walked_lazily() {
        let mut fx = Fixture::new();
        let path = fx.write("sql/seq.sql", "select @sequence@\n");
        let mut v = vars(&path.to_string_lossy());
        v.sequence = Some(SequenceRange::new(1, i64::MAX));
        fx.token.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = run_sql(&mut fx.ctx(), &v).unwrap_err();

        assert!(matches!(err.downcast_ref::<ExecutionError>(), Some(ExecutionError::Cancelled)));
        assert!(fx.backend.executed_sql().is_empty());
    }

    #[test]
    fn test_inline_command_is_resolved_and_run_once() {
        let mut fx = Fixture::new();
        let outcome = run_inline(&mut fx.ctx(), &vars("select count(*) from &users&")).unwrap();
        assert!(outcome.is_success());
        assert_eq!(fx.backend.executed_sql(), vec!["select count(*) from sbnmaster..users\n"]);
        assert_eq!(fx.backend.state().closed, 1);
    }
}
