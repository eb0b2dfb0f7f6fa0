// src/core/orchestrator.rs

//! # Orchestrator
//!
//! Runs a build script (`runcreate`) line by line. Each line is tokenized by
//! [`build_script`](crate::core::build_script) and dispatched, strictly in
//! order, to the script runner, to a nested build script, to the upgrade
//! runner or to one of the metadata compilers.
//!
//! The audit statement is written once, by the top-level invocation only.

use crate::{
    constants::MAX_BUILD_DEPTH,
    core::{
        build_script::{self, BuildCommand, BuildLine, ParsedLine},
        compilers::{self, CompilerKind},
        context::{RunContext, changelog_statement},
        script_runner::{self, fold_execution_error, locate_source},
        upgrade,
    },
    models::{CommandVariables, RunOutcome},
    system::{backend::execute_once, executor::check_for_cancellation},
};
use anyhow::Result;
use std::{fs, path::PathBuf};

const RUNCREATE_PROGRAM: &str = "runcreate";

/// Top-level `runcreate`: audit, the build itself, then a summary.
pub fn run_create(ctx: &mut RunContext<'_>, vars: &CommandVariables) -> Result<RunOutcome> {
    if vars.changelog && !ctx.env.raw_mode && !vars.preview {
        write_changelog(ctx, RUNCREATE_PROGRAM, vars)?;
    }

    let mut stack = Vec::new();
    let outcome = run_build_script(ctx, vars, &mut stack)?;

    ctx.emit(&format!(
        "Build finished: {} unit(s) run, {} failed.",
        outcome.executed, outcome.failed
    ));
    Ok(outcome)
}

/// Executes the audit statement on its own connection. Failures are reported, not fatal.
pub(crate) fn write_changelog(ctx: &mut RunContext<'_>, program: &str, vars: &CommandVariables) -> Result<()> {
    let statement = changelog_statement(program, &vars.command_line, &ctx.env.user);
    let sql = format!("{}\ngo\n", ctx.resolve_word(&statement));
    match execute_once(ctx.backend, &sql, vars.database.as_deref(), ctx.cancellation_token) {
        Ok(outcome) if outcome.success => Ok(()),
        Ok(outcome) => {
            log::warn!("Changelog entry was not written.");
            ctx.report_error(&format!("Changelog entry failed: {}", outcome.output.trim()));
            Ok(())
        }
        Err(e) => fold_execution_error(ctx, e).map(|_| ()),
    }
}

/// Runs one build script. `stack` holds the scripts currently being run, for cycle detection.
fn run_build_script(
    ctx: &mut RunContext<'_>,
    vars: &CommandVariables,
    stack: &mut Vec<PathBuf>,
) -> Result<RunOutcome> {
    let path = locate_source(ctx, &vars.source);
    if !path.is_file() {
        ctx.report_error(&format!("Build script not found: '{}'", path.display()));
        return Ok(RunOutcome::failure());
    }
    let identity = dunce::canonicalize(&path).unwrap_or_else(|_| path.clone());

    if stack.contains(&identity) {
        ctx.report_error(&format!(
            "Build script '{}' includes itself; skipped.",
            path.display()
        ));
        return Ok(RunOutcome::failure());
    }
    if stack.len() >= MAX_BUILD_DEPTH {
        ctx.report_error(&format!(
            "Build scripts nested deeper than {} levels at '{}'.",
            MAX_BUILD_DEPTH,
            path.display()
        ));
        return Ok(RunOutcome::failure());
    }

    let content = match fs::read(&path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            ctx.report_error(&format!("Failed to read '{}': {}", path.display(), e));
            return Ok(RunOutcome::failure());
        }
    };
    log::info!("Running build script '{}'", path.display());

    stack.push(identity);
    let result = run_lines(ctx, vars, &content, stack);
    stack.pop();
    result
}

fn run_lines(
    ctx: &mut RunContext<'_>,
    vars: &CommandVariables,
    content: &str,
    stack: &mut Vec<PathBuf>,
) -> Result<RunOutcome> {
    let root = ctx.env.sql_source_root.to_string_lossy().into_owned();
    let mut total = RunOutcome::default();

    for (number, line) in content.lines().enumerate() {
        check_for_cancellation(ctx.cancellation_token)?;
        let parsed = {
            let resolver = |text: &str| ctx.resolve_word(text);
            build_script::parse_line(line, &resolver, &root)
        };
        match parsed {
            ParsedLine::Skip => {}
            ParsedLine::Inert(text) => {
                log::debug!("Line {} is not a command; skipped: {}", number + 1, text);
            }
            ParsedLine::Command(build_line) => {
                log::debug!("Line {}: {:?}", number + 1, build_line);
                total.merge(dispatch(ctx, vars, &build_line, stack)?);
            }
        }
    }
    Ok(total)
}

fn dispatch(
    ctx: &mut RunContext<'_>,
    vars: &CommandVariables,
    line: &BuildLine,
    stack: &mut Vec<PathBuf>,
) -> Result<RunOutcome> {
    let compiler = match line.command {
        BuildCommand::RunSql => return dispatch_runsql(ctx, vars, line),
        BuildCommand::RunCreate => {
            let Some(source) = &line.source else {
                ctx.report_error("runcreate: no build script given.");
                return Ok(RunOutcome::failure());
            };
            return run_build_script(ctx, &vars.nested(source.as_str()), stack);
        }
        BuildCommand::RunUpgrade => return dispatch_upgrade(ctx, vars, line),
        BuildCommand::ImportOptions => CompilerKind::Options,
        BuildCommand::CreateTableLocations => CompilerKind::TableLocations,
        BuildCommand::InstallMessages => CompilerKind::Messages,
        BuildCommand::CompileActions => CompilerKind::Actions,
        BuildCommand::InstallRequiredFields => CompilerKind::RequiredFields,
    };
    if vars.preview {
        ctx.emit(&format!("{} (not run in preview)", line.command));
        return Ok(RunOutcome::default());
    }
    compilers::run_compiler(ctx, compiler)
}

/// One `runsql` per distinct database; the line's own database list wins over the caller's.
pub(crate) fn dispatch_runsql(ctx: &mut RunContext<'_>, vars: &CommandVariables, line: &BuildLine) -> Result<RunOutcome> {
    let Some(source) = &line.source else {
        ctx.report_error("runsql: no source file given.");
        return Ok(RunOutcome::failure());
    };

    let databases: Vec<Option<String>> = if line.databases.is_empty() {
        vec![vars.database.clone()]
    } else {
        line.databases.iter().cloned().map(Some).collect()
    };

    let mut total = RunOutcome::default();
    for database in databases {
        let mut nested = vars.nested(source.as_str());
        nested.database = database;
        nested.sequence = line.sequence;
        nested.echo_input |= line.has_flag("-e");
        total.merge(script_runner::run_sql(ctx, &nested)?);
    }
    Ok(total)
}

fn dispatch_upgrade(ctx: &mut RunContext<'_>, vars: &CommandVariables, line: &BuildLine) -> Result<RunOutcome> {
    let Some(source) = &line.source else {
        ctx.report_error("i_run_upgrade: no upgrade file given.");
        return Ok(RunOutcome::failure());
    };
    let mut nested = vars.nested(source.as_str());
    if let Some(db) = line.databases.first() {
        nested.database = Some(db.clone());
    }
    nested.upgrade_number = build_script::upgrade_id_from_path(source);
    upgrade::run_upgrade(ctx, &nested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, text_columns};

    fn vars(source: &str) -> CommandVariables {
        CommandVariables {
            source: source.to_string(),
            changelog: true,
            command_line: "runcreate build -P secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_runsql_lines_dispatch_per_distinct_database() {
        let mut fx = Fixture::new();
        fx.write("css/a.sql", "select 1\n");
        let build = fx.write(
            "css/build",
            "# build\n\nrunsql $ir>css>a.sql -D&dbtbl& -D&dbrpt& -Dsbnmaster\n",
        );

        let outcome = run_create(&mut fx.ctx(), &vars(&build.to_string_lossy())).unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.executed, 2);
        let opened = fx.backend.state().opened.clone();
        // The changelog connection, then one per database.
        assert_eq!(
            opened,
            vec![None, Some("sbnmaster".to_string()), Some("sbnreport".to_string())]
        );
    }

    #[test]
    fn test_changelog_is_written_once_for_the_whole_tree() {
        let mut fx = Fixture::new();
        fx.write("css/a.sql", "select 1\n");
        fx.write("css/inner", "runsql $ir>css>a.sql -D&dbtbl&\n");
        let build = fx.write("css/outer", "runcreate $ir>css>inner\nrunsql $ir>css>a.sql\n");

        let _ = run_create(&mut fx.ctx(), &vars(&build.to_string_lossy())).unwrap();

        let audits = fx
            .backend
            .executed_sql()
            .iter()
            .filter(|sql| sql.contains("&i_changelog&"))
            .count();
        assert_eq!(audits, 1);
        assert!(fx.backend.executed_sql()[0].contains("@program = 'RUNCREATE'"));
    }

    #[test]
    fn test_commented_out_line_does_not_dispatch() {
        let mut fx = Fixture::new();
        fx.write("css/a.sql", "select 1\n");
        let build = fx.write("css/build", "&if_mssql&runsql $ir>css>a.sql -Dbar\n");
        let mut v = vars(&build.to_string_lossy());
        v.changelog = false;

        let outcome = run_create(&mut fx.ctx(), &v).unwrap();

        assert_eq!(outcome.executed, 0);
        assert!(fx.backend.executed_sql().is_empty());
    }

    #[test]
    fn test_failed_file_does_not_stop_the_build() {
        let mut fx = Fixture::new();
        fx.backend.fail_on("broken");
        fx.write("css/a.sql", "exec broken\n");
        fx.write("css/b.sql", "select 2\n");
        let build = fx.write("css/build", "runsql $ir>css>a.sql\nrunsql $ir>css>missing.sql\nrunsql $ir>css>b.sql\n");
        let mut v = vars(&build.to_string_lossy());
        v.changelog = false;

        let outcome = run_create(&mut fx.ctx(), &v).unwrap();

        assert_eq!(outcome.executed, 3);
        assert_eq!(outcome.failed, 2);
        assert!(fx.backend.executed_sql().iter().any(|sql| sql.contains("select 2")));
        assert!(fx.printed().contains("Build finished: 3 unit(s) run, 2 failed."));
    }

    #[test]
    fn test_self_including_script_is_detected() {
        let mut fx = Fixture::new();
        let build = fx.write("css/loop", "runcreate $ir>css>loop\n");
        let mut v = vars(&build.to_string_lossy());
        v.changelog = false;

        let outcome = run_create(&mut fx.ctx(), &v).unwrap();

        assert!(!outcome.is_success());
        assert!(fx.printed().contains("includes itself"));
    }

    #[test]
    fn test_upgrade_line_takes_its_number_from_the_file_name() {
        let mut fx = Fixture::new();
        fx.write("css/upgrades/sct_88.sql", "select 'upgrade'\ngo\n");
        let build = fx.write("css/build", "i_run_upgrade $ir>css>upgrades>sct_88.sql -D&dbtbl&\n");

        let outcome = run_create(&mut fx.ctx(), &vars(&build.to_string_lossy())).unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.executed, 1);
        let state = fx.backend.state();
        assert_eq!(state.calls, vec!["&i_upgrade_check& '88'"]);
        assert!(state.applied_upgrades.contains("88"));
        assert!(
            state
                .executed
                .contains(&(Some("sbnmaster".to_string()), "select 'upgrade'\n".to_string()))
        );
        let audits: Vec<&String> = state
            .executed
            .iter()
            .map(|(_, sql)| sql)
            .filter(|sql| sql.contains("&i_changelog&"))
            .collect();
        assert_eq!(audits.len(), 1);
        assert!(audits[0].contains("@program = 'RUNCREATE'"));
    }

    #[test]
    fn test_compiler_line_runs_the_compiler() {
        let mut fx = Fixture::new();
        fx.backend.create_table(
            "&w_options&",
            text_columns(&["name", "kind", "value", "description", "tier"]),
        );
        let build = fx.write("css/build", "import_options\n");
        let mut v = vars(&build.to_string_lossy());
        v.changelog = false;

        let outcome = run_create(&mut fx.ctx(), &v).unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.executed, 1);
        assert!(!fx.backend.table_rows("&w_options&").is_empty());
        assert_eq!(fx.backend.executed_sql().last().map(String::as_str), Some("exec &i_options_compile&"));
    }

    #[test]
    fn test_preview_skips_compilers_and_audit() {
        let mut fx = Fixture::new();
        let build = fx.write("css/build", "import_options\ncompile_actions\n");
        let mut v = vars(&build.to_string_lossy());
        v.preview = true;

        let outcome = run_create(&mut fx.ctx(), &v).unwrap();

        assert!(outcome.is_success());
        assert!(fx.backend.executed_sql().is_empty());
        assert!(fx.backend.state().opened.is_empty());
        assert!(fx.printed().contains("import_options (not run in preview)"));
        assert!(fx.printed().contains("compile_actions (not run in preview)"));
    }

    #[test]
    fn test_sequence_and_line_order_are_kept() {
        let mut fx = Fixture::new();
        fx.write("css/seq.sql", "insert t values (@sequence@)\n");
        fx.write("css/last.sql", "select 'last'\n");
        let build = fx.write("css/build", "runsql $ir>css>seq.sql -F1 -L2\nrunsql $ir>css>last.sql\n");
        let mut v = vars(&build.to_string_lossy());
        v.changelog = false;

        let _ = run_create(&mut fx.ctx(), &v).unwrap();

        assert_eq!(
            fx.backend.executed_sql(),
            vec!["insert t values (1)\n", "insert t values (2)\n", "select 'last'\n"]
        );
    }
}
