// src/core/compilers/messages.rs

//! `install_msg`: one file per message category under `CSS/Setup/messages`,
//! each line `<id> <text>`.

use super::{CompileError, CompilePlan, WorkTableLoad, content_lines, read_source};
use crate::core::context::RunContext;
use walkdir::WalkDir;

const MESSAGES_DIR: &str = "messages";

pub(super) fn plan(ctx: &RunContext<'_>) -> Result<CompilePlan, CompileError> {
    let dir = ctx.options.setup_dir().join(MESSAGES_DIR);
    if !dir.is_dir() {
        return Err(CompileError::MissingSource(dir.display().to_string()));
    }

    let mut rows = Vec::new();
    for entry in WalkDir::new(&dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| CompileError::read(&dir, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let category = entry.file_name().to_string_lossy().into_owned();
        let content = read_source(entry.path())?;

        for (number, line) in content_lines(&content) {
            let line = line.trim_start();
            let (id, text) = match line.find(char::is_whitespace) {
                Some(pos) => (&line[..pos], line[pos..].trim()),
                None => (line, ""),
            };
            if id.parse::<i64>().is_err() {
                return Err(CompileError::Malformed {
                    path: entry.path().display().to_string(),
                    line: number,
                    message: format!("message id '{}' is not a number", id),
                });
            }
            rows.push(vec![
                category.clone(),
                id.to_string(),
                ctx.env.language.clone(),
                text.to_string(),
            ]);
        }
    }
    log::debug!("Collected {} message(s) from '{}'", rows.len(), dir.display());

    Ok(CompilePlan {
        loads: vec![WorkTableLoad {
            table: "&w_messages&",
            rows,
        }],
        procedure: "&i_messages_compile&",
    })
}
