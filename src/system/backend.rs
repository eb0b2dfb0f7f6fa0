//! # Execution Abstraction
//!
//! One [`Backend`] per database platform behind an identical contract. A
//! backend opens [`Session`]s; a session keeps one server connection so
//! that the current database and temp objects survive across batches.
//!
//! Batches are the GO-delimited chunks of a script. Each batch result is a
//! value, so one failed batch never stops the batches after it.

use crate::{
    CancellationToken,
    models::{Platform, ResolvedEnvironment},
    system::{
        executor::{ExecutionError, check_for_cancellation},
        mssql::MssqlBackend,
        sybase::SybaseBackend,
    },
};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// What a successful batch produced: rendered result sets and server messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutput {
    /// Rendered output, messages included.
    pub text: String,
}

/// A batch the server rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// The server's error text.
    pub message: String,
    /// Anything the batch printed before it failed.
    pub output: String,
}

impl BatchError {
    /// An error with no captured output.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: String::new(),
        }
    }

    /// Captured output followed by the error message.
    pub fn full_text(&self) -> String {
        if self.output.trim().is_empty() {
            self.message.clone()
        } else {
            format!("{}\n{}", self.output.trim_end(), self.message)
        }
    }
}

/// Outcome of one batch; server errors are values.
pub type BatchResult = Result<BatchOutput, BatchError>;

/// Text of a server notice that only reports a session context change.
pub(crate) fn is_context_notice(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("Changed database context to")
        || trimmed.starts_with("Changed language setting to")
        || trimmed.starts_with("Changed client character set")
}

/// One column of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Server type name, e.g. `varchar`.
    pub type_name: String,
}

impl ColumnInfo {
    /// A column of the given type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    /// Numeric columns receive `0` for empty fields during bulk load.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.type_name.to_ascii_lowercase().as_str(),
            "int"
                | "integer"
                | "smallint"
                | "tinyint"
                | "bigint"
                | "unsigned int"
                | "unsigned smallint"
                | "unsigned bigint"
                | "decimal"
                | "numeric"
                | "float"
                | "real"
                | "double precision"
                | "money"
                | "smallmoney"
                | "bit"
                | "intn"
                | "decimaln"
                | "numericn"
                | "floatn"
                | "moneyn"
        )
    }
}

/// One open connection.
pub trait Session {
    /// Sends one batch and collects its output.
    fn execute_batch(&mut self, sql: &str) -> BatchResult;

    /// Executes a procedure call (`name args...`) and returns its return status.
    fn exec_return_code(&mut self, call: &str) -> Result<i32, ExecutionError>;

    /// Column names and types of `table`, in table order.
    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, ExecutionError>;

    /// Loads already-coerced rows into `table` and returns how many were sent.
    fn bulk_insert(
        &mut self,
        table: &str,
        columns: &[ColumnInfo],
        rows: &mut dyn Iterator<Item = Vec<String>>,
    ) -> Result<u64, ExecutionError>;

    /// Streams every row of `table` to `sink`, NULLs as empty fields.
    fn bulk_export(
        &mut self,
        table: &str,
        sink: &mut dyn FnMut(Vec<String>) -> std::io::Result<()>,
    ) -> Result<u64, ExecutionError>;

    /// Closes the connection.
    fn close(self: Box<Self>) -> Result<(), ExecutionError>;
}

/// Opens sessions against one server.
pub trait Backend {
    /// The platform this backend speaks to.
    fn platform(&self) -> Platform;

    /// Connects, optionally switching to `database`.
    fn open(&self, database: Option<&str>) -> Result<Box<dyn Session>, ExecutionError>;
}

/// Creates the backend matching the environment's platform.
pub fn backend_for(
    env: &ResolvedEnvironment,
    runtime: Arc<Runtime>,
    cancellation_token: &CancellationToken,
) -> Box<dyn Backend> {
    match env.platform {
        Platform::Mssql => Box::new(MssqlBackend::new(env, runtime)),
        Platform::Sybase => Box::new(SybaseBackend::new(env, cancellation_token.clone())),
    }
}

// --- BATCHING ---

/// True for a line that is exactly `go`, in any case, ignoring surrounding blanks.
pub fn is_batch_terminator(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("go")
}

/// True for a client-only `exit`/`quit` line.
pub fn is_exit_command(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit")
}

/// Splits SQL text on `go` lines. Blank batches are dropped.
pub fn split_batches(sql: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        if is_batch_terminator(line) {
            if !current.trim().is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            current.clear();
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        batches.push(current);
    }
    batches
}

/// Runs `batches` in order on one session.
///
/// An `exit`/`quit` batch stops processing without reaching the server. The
/// `observer` sees every batch before its result is stored. Only cancellation
/// is an `Err`; server failures are collected in the returned list.
pub fn run_batches(
    session: &mut dyn Session,
    batches: &[String],
    cancellation_token: &CancellationToken,
    mut observer: impl FnMut(usize, &str, &BatchResult),
) -> Result<Vec<BatchResult>, ExecutionError> {
    let mut results = Vec::with_capacity(batches.len());
    for (index, batch) in batches.iter().enumerate() {
        if is_exit_command(batch) {
            log::debug!("Batch {} is an exit command; stopping.", index + 1);
            break;
        }
        check_for_cancellation(cancellation_token)?;
        let result = session.execute_batch(batch);
        if let Err(e) = &result {
            log::debug!("Batch {} failed: {}", index + 1, e.message);
        }
        observer(index, batch, &result);
        results.push(result);
    }
    Ok(results)
}

/// Result of a single-shot execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Every batch succeeded.
    pub success: bool,
    /// Everything the batches printed, errors included.
    pub output: String,
}

/// Opens a connection, runs every batch of `sql` and closes it again.
pub fn execute_once(
    backend: &dyn Backend,
    sql: &str,
    database: Option<&str>,
    cancellation_token: &CancellationToken,
) -> Result<ExecutionOutcome, ExecutionError> {
    let batches = split_batches(sql);
    let mut session = scopeguard::guard(backend.open(database)?, |session| {
        if let Err(e) = session.close() {
            log::warn!("Failed to close connection: {}", e);
        }
    });

    let mut output = String::new();
    let results = run_batches(session.as_mut(), &batches, cancellation_token, |_, _, result| {
        let text = match result {
            Ok(batch) => batch.text.clone(),
            Err(e) => e.full_text(),
        };
        if !text.trim().is_empty() {
            output.push_str(text.trim_end());
            output.push('\n');
        }
    })?;

    Ok(ExecutionOutcome {
        success: results.iter().all(Result::is_ok),
        output,
    })
}

/// Splits `db..table` (or `db.owner.table`) into its database and the rest.
pub fn split_qualified(table: &str) -> (Option<&str>, &str) {
    match table.split_once('.') {
        Some((db, rest)) if !db.is_empty() => (Some(db), rest.trim_start_matches('.')),
        _ => (None, table),
    }
}
