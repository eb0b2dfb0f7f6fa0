// src/core/compilers/mod.rs

//! # Metadata Compilers
//!
//! Each compiler reads one family of flat files under `CSS/Setup`, turns it
//! into rows for one or more server-side work tables, bulk loads those rows
//! and finally calls the server procedure that compiles the work tables
//! into the live metadata tables.
//!
//! The steps run in order on one connection. The first failing step aborts
//! the rest; steps already applied stay applied.

mod actions;
mod messages;
mod options;
mod required_fields;
mod table_locations;

use crate::{
    core::context::RunContext,
    models::RunOutcome,
    system::{
        backend::Session,
        bulk::{BulkDirection, bulk_copy},
        executor::{ExecutionError, check_for_cancellation},
    },
};
use anyhow::Result;
use std::{
    fmt,
    io::{BufWriter, Write},
    path::Path,
};
use thiserror::Error;

/// Why a compiler could not build its plan.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Compiler source not found: '{0}'")]
    MissingSource(String),
    #[error("Failed to read compiler source '{path}': {message}")]
    Read { path: String, message: String },
    #[error("{path}:{line}: {message}")]
    Malformed { path: String, line: usize, message: String },
}

impl CompileError {
    fn read(path: &Path, error: impl fmt::Display) -> Self {
        Self::Read {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    }
}

/// The five metadata compilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerKind {
    Options,
    TableLocations,
    Messages,
    Actions,
    RequiredFields,
}

impl CompilerKind {
    /// The build-script command that runs this compiler.
    pub fn name(self) -> &'static str {
        match self {
            Self::Options => "import_options",
            Self::TableLocations => "create_tbl_locations",
            Self::Messages => "install_msg",
            Self::Actions => "compile_actions",
            Self::RequiredFields => "install_required_fields",
        }
    }

    fn plan(self, ctx: &RunContext<'_>) -> Result<CompilePlan, CompileError> {
        match self {
            Self::Options => options::plan(ctx),
            Self::TableLocations => table_locations::plan(ctx),
            Self::Messages => messages::plan(ctx),
            Self::Actions => actions::plan(ctx),
            Self::RequiredFields => required_fields::plan(ctx),
        }
    }
}

impl fmt::Display for CompilerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rows bound for one work table, named by its placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkTableLoad {
    /// Work-table placeholder, e.g. `&w_options&`.
    pub table: &'static str,
    /// Rows in column order.
    pub rows: Vec<Vec<String>>,
}

/// Everything a compiler does against the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilePlan {
    /// Work tables to load, in order.
    pub loads: Vec<WorkTableLoad>,
    /// Placeholder of the compile procedure called after all loads.
    pub procedure: &'static str,
}

/// Runs one compiler. A no-op in raw mode.
pub fn run_compiler(ctx: &mut RunContext<'_>, kind: CompilerKind) -> Result<RunOutcome> {
    if ctx.env.raw_mode {
        log::info!("Raw mode: {} skipped.", kind);
        return Ok(RunOutcome::default());
    }

    let plan = match kind.plan(ctx) {
        Ok(plan) => plan,
        Err(e) => {
            ctx.report_error(&format!("{}: {}", kind, e));
            return Ok(RunOutcome::failure());
        }
    };

    match apply(ctx, kind, &plan) {
        Ok(()) => {
            ctx.emit(&format!("{} completed.", kind));
            Ok(RunOutcome::success())
        }
        Err(ExecutionError::Cancelled) => Err(ExecutionError::Cancelled.into()),
        Err(e) => {
            ctx.report_error(&format!("{}: {}", kind, e));
            Ok(RunOutcome::failure())
        }
    }
}

fn apply(ctx: &mut RunContext<'_>, kind: CompilerKind, plan: &CompilePlan) -> Result<(), ExecutionError> {
    let mut session = scopeguard::guard(ctx.backend.open(None)?, |session| {
        if let Err(e) = session.close() {
            log::warn!("Failed to close connection: {}", e);
        }
    });

    for load in &plan.loads {
        check_for_cancellation(ctx.cancellation_token)?;
        let table = ctx.resolve_word(load.table);
        load_work_table(session.as_mut(), kind, &table, &load.rows)?;
        ctx.emit(&format!("{}: {} row(s) loaded into {}.", kind, load.rows.len(), table));
    }

    check_for_cancellation(ctx.cancellation_token)?;
    let call = format!("exec {}", ctx.resolve_word(plan.procedure));
    match session.execute_batch(&call) {
        Ok(output) => {
            ctx.emit(&output.text);
            Ok(())
        }
        Err(e) => Err(ExecutionError::Server(e.full_text())),
    }
}

fn load_work_table(
    session: &mut dyn Session,
    kind: CompilerKind,
    table: &str,
    rows: &[Vec<String>],
) -> Result<(), ExecutionError> {
    session
        .execute_batch(&format!("delete from {}", table))
        .map_err(|e| ExecutionError::Server(e.full_text()))?;

    let mut data = tempfile::Builder::new()
        .prefix("ibs_work_")
        .suffix(".dat")
        .tempfile()?;
    {
        let mut writer = BufWriter::new(data.as_file_mut());
        for row in rows {
            let fields: Vec<String> = row.iter().map(|f| sanitize(f)).collect();
            writeln!(writer, "{}", fields.join("\t"))?;
        }
        writer.flush()?;
    }

    let loaded = bulk_copy(session, table, BulkDirection::In, data.path(), &mut |count: u64| {
        log::info!("{}: {} rows sent to {}", kind, count, table);
    })?;
    log::debug!("{}: {} row(s) loaded into {}", kind, loaded, table);
    Ok(())
}

/// Tabs and line breaks would split a field or a row in the data file.
fn sanitize(field: &str) -> String {
    field.replace(['\t', '\r', '\n'], " ")
}

/// Characters `[start, end)` of `line`, trimmed. An open `end` runs to the end of the line.
pub(crate) fn fixed_column(line: &str, start: usize, end: Option<usize>) -> String {
    let chars = line.chars().skip(start);
    let taken: String = match end {
        Some(end) => chars.take(end.saturating_sub(start)).collect(),
        None => chars.collect(),
    };
    taken.trim().to_string()
}

/// Lines of a compiler source, skipping blanks and `#` comments, with 1-based numbers.
pub(crate) fn content_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim_end()))
        .filter(|(_, line)| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
}

/// Reads a required compiler source.
pub(crate) fn read_source(path: &Path) -> Result<String, CompileError> {
    if !path.is_file() {
        return Err(CompileError::MissingSource(path.display().to_string()));
    }
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|e| CompileError::read(path, e))
}
