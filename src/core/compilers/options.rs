// src/core/compilers/options.rs

//! `import_options`: every directive of every option tier, dynamic ones
//! included, for the server-side options table.

use super::{CompileError, CompilePlan, WorkTableLoad};
use crate::core::{
    context::RunContext,
    option_file::{self, OptionDirective},
    options::OptionTier,
};

pub(super) fn plan(ctx: &RunContext<'_>) -> Result<CompilePlan, CompileError> {
    let company_path = ctx.options.tier_path(OptionTier::Company);
    if !company_path.is_file() {
        return Err(CompileError::MissingSource(company_path.display().to_string()));
    }

    let mut rows = Vec::new();
    for tier in [OptionTier::Default, OptionTier::Company, OptionTier::Profile] {
        let path = ctx.options.tier_path(tier);
        if !path.is_file() {
            continue;
        }
        let directives = option_file::parse_file(&path).map_err(|e| CompileError::read(&path, e))?;
        rows.extend(directives.into_iter().filter_map(|source| row(&source.directive, tier)));
    }

    Ok(CompilePlan {
        loads: vec![WorkTableLoad {
            table: "&w_options&",
            rows,
        }],
        procedure: "&i_options_compile&",
    })
}

/// `(name, kind, value, description, tier)`; table mappings belong to `create_tbl_locations`.
fn row(directive: &OptionDirective, tier: OptionTier) -> Option<Vec<String>> {
    let kind = directive.kind_code().to_string();
    match directive {
        OptionDirective::Value {
            name,
            value,
            description,
            ..
        } => Some(vec![
            name.clone(),
            kind,
            value.clone(),
            description.clone(),
            tier.label().to_string(),
        ]),
        OptionDirective::Conditional {
            name,
            enabled,
            description,
            ..
        } => Some(vec![
            name.clone(),
            kind,
            if *enabled { "+" } else { "-" }.to_string(),
            description.clone(),
            tier.label().to_string(),
        ]),
        OptionDirective::TableMapping { .. } => None,
    }
}
