// src/core/compilers/table_locations.rs

//! `create_tbl_locations`: the `table_locations` mappings.

use super::{CompileError, CompilePlan, WorkTableLoad};
use crate::core::{
    context::RunContext,
    option_file::{self, OptionDirective},
};

/// `create_tbl_locations`: one `(table, db_placeholder, database, description)` row per mapping.
pub(super) fn plan(ctx: &RunContext<'_>) -> Result<CompilePlan, CompileError> {
    let path = ctx.options.table_locations_path();
    if !path.is_file() {
        return Err(CompileError::MissingSource(path.display().to_string()));
    }

    let rows = option_file::parse_file(&path)
        .map_err(|e| CompileError::read(&path, e))?
        .into_iter()
        .filter_map(|source| match source.directive {
            OptionDirective::TableMapping {
                table,
                db_placeholder,
                description,
            } => {
                let database = ctx.resolve_word(&db_placeholder);
                Some(vec![table, db_placeholder, database, description])
            }
            _ => None,
        })
        .collect();

    Ok(CompilePlan {
        loads: vec![WorkTableLoad {
            table: "&w_table_locations&",
            rows,
        }],
        procedure: "&i_table_locations_compile&",
    })
}
