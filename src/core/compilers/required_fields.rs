// src/core/compilers/required_fields.rs

//! `install_required_fields`: `<table> <column> [description]` per line.

use super::{CompileError, CompilePlan, WorkTableLoad, content_lines, read_source};
use crate::core::context::RunContext;

const SOURCE_FILENAME: &str = "required_fields";

pub(super) fn plan(ctx: &RunContext<'_>) -> Result<CompilePlan, CompileError> {
    let path = ctx.options.setup_dir().join(SOURCE_FILENAME);
    let content = read_source(&path)?;

    let mut rows = Vec::new();
    for (number, line) in content_lines(&content) {
        let mut parts = line.split_whitespace();
        let (Some(table), Some(column)) = (parts.next(), parts.next()) else {
            return Err(CompileError::Malformed {
                path: path.display().to_string(),
                line: number,
                message: "expected '<table> <column> [description]'".to_string(),
            });
        };
        let description = parts.collect::<Vec<_>>().join(" ");
        rows.push(vec![table.to_string(), column.to_string(), description]);
    }

    Ok(CompilePlan {
        loads: vec![WorkTableLoad {
            table: "&w_required_fields&",
            rows,
        }],
        procedure: "&i_required_fields_compile&",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_description_is_optional() {
        let mut fx = Fixture::new();
        fx.write(
            "CSS/Setup/required_fields",
            "# table column description\nusers  login_name  Login of the user\nusers email\n",
        );

        let plan = plan(&fx.ctx()).unwrap();

        assert_eq!(
            plan.loads[0].rows,
            vec![
                vec!["users", "login_name", "Login of the user"],
                vec!["users", "email", ""],
            ]
        );
    }

    #[test]
    fn test_line_without_column_is_malformed() {
        let mut fx = Fixture::new();
        fx.write("CSS/Setup/required_fields", "users\n");
        let err = plan(&fx.ctx()).unwrap_err();
        assert!(matches!(err, CompileError::Malformed { line: 1, .. }));
    }
}
