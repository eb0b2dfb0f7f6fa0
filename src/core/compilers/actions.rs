// src/core/compilers/actions.rs

//! `compile_actions`: the fixed-column `actions` and `actions_dtl` sources.
//!
//! ```text
//! actions      [0,40) action  [40,50) type  [50,..) description
//! actions_dtl  [0,40) action  [40,46) seq   [46,86) target  [86,..) parameters
//! ```

use super::{CompileError, CompilePlan, WorkTableLoad, content_lines, fixed_column, read_source};
use crate::core::context::RunContext;
use std::path::Path;

const ACTIONS_FILENAME: &str = "actions";
const DETAILS_FILENAME: &str = "actions_dtl";

pub(super) fn plan(ctx: &RunContext<'_>) -> Result<CompilePlan, CompileError> {
    let setup = ctx.options.setup_dir();
    let actions = read_actions(&setup.join(ACTIONS_FILENAME))?;
    let details = read_details(&setup.join(DETAILS_FILENAME))?;

    Ok(CompilePlan {
        loads: vec![
            WorkTableLoad {
                table: "&w_actions&",
                rows: actions,
            },
            WorkTableLoad {
                table: "&w_actions_dtl&",
                rows: details,
            },
        ],
        procedure: "&i_actions_compile&",
    })
}

fn malformed(path: &Path, line: usize, message: impl Into<String>) -> CompileError {
    CompileError::Malformed {
        path: path.display().to_string(),
        line,
        message: message.into(),
    }
}

fn read_actions(path: &Path) -> Result<Vec<Vec<String>>, CompileError> {
    let content = read_source(path)?;
    let mut rows = Vec::new();
    for (number, line) in content_lines(&content) {
        let action = fixed_column(line, 0, Some(40));
        if action.is_empty() {
            return Err(malformed(path, number, "action name is empty"));
        }
        rows.push(vec![
            action,
            fixed_column(line, 40, Some(50)),
            fixed_column(line, 50, None),
        ]);
    }
    Ok(rows)
}

fn read_details(path: &Path) -> Result<Vec<Vec<String>>, CompileError> {
    let content = read_source(path)?;
    let mut rows = Vec::new();
    for (number, line) in content_lines(&content) {
        let action = fixed_column(line, 0, Some(40));
        if action.is_empty() {
            return Err(malformed(path, number, "action name is empty"));
        }
        let seq = fixed_column(line, 40, Some(46));
        if seq.parse::<u32>().is_err() {
            return Err(malformed(path, number, format!("sequence '{}' is not a number", seq)));
        }
        rows.push(vec![
            action,
            seq,
            fixed_column(line, 46, Some(86)),
            fixed_column(line, 86, None),
        ]);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::compilers::{CompilerKind, run_compiler},
        testing::{Fixture, text_columns},
    };

    fn columns(fields: &[(&str, usize)]) -> String {
        fields.iter().map(|(text, width)| format!("{:<width$}", text, width = width)).collect()
    }

    fn write_sources(fx: &Fixture) {
        let action = columns(&[("close_order", 40), ("proc", 10), ("Closes an order", 0)]);
        let detail = columns(&[("close_order", 40), ("1", 6), ("i_close_order", 40), ("@order_id", 0)]);
        fx.write("CSS/Setup/actions", &format!("{}\n", action));
        fx.write("CSS/Setup/actions_dtl", &format!("{}\n", detail));
    }

    #[test]
    fn test_fixed_columns_are_split() {
        let mut fx = Fixture::new();
        write_sources(&fx);

        let plan = plan(&fx.ctx()).unwrap();

        assert_eq!(plan.loads[0].rows, vec![vec!["close_order", "proc", "Closes an order"]]);
        assert_eq!(
            plan.loads[1].rows,
            vec![vec!["close_order", "1", "i_close_order", "@order_id"]]
        );
    }

    #[test]
    fn test_detail_failure_skips_compile_but_keeps_actions_loaded() {
        let mut fx = Fixture::new();
        write_sources(&fx);
        fx.backend
            .create_table("&w_actions&", text_columns(&["action", "type", "description"]));

        let outcome = run_compiler(&mut fx.ctx(), CompilerKind::Actions).unwrap();

        assert!(!outcome.is_success());
        assert_eq!(fx.backend.table_rows("&w_actions&").len(), 1);
        assert!(!fx.backend.executed_sql().iter().any(|sql| sql.contains("i_actions_compile")));
    }

    #[test]
    fn test_bad_sequence_is_malformed() {
        let mut fx = Fixture::new();
        write_sources(&fx);
        let bad = columns(&[("close_order", 40), ("x", 6), ("target", 40)]);
        fx.write("CSS/Setup/actions_dtl", &format!("{}\n", bad));
        assert!(matches!(plan(&fx.ctx()), Err(CompileError::Malformed { line: 1, .. })));
    }
}
