//! MSSQL backend over the TDS wire protocol.
//!
//! Every call is driven to completion on the shared runtime with
//! `block_on`; callers stay synchronous.
//!
//! The driver reports `print` output and other informational messages only
//! as `tracing` events, so a batch runs with [`InfoMessages`] installed as
//! the thread's dispatcher and the captured text is merged into its output.

use crate::{
    constants::INSERT_ROWS_PER_STATEMENT,
    models::{Platform, ResolvedEnvironment},
    system::{
        backend::{
            Backend, BatchError, BatchOutput, BatchResult, ColumnInfo, Session, is_context_notice, split_qualified,
        },
        executor::ExecutionError,
        render::{RenderColumn, ResultSet},
    },
};
use futures::TryStreamExt;
use std::{
    fmt,
    sync::{Arc, Mutex},
};
use tiberius::{AuthMethod, Client, ColumnData, ColumnType, Config, FromSql, QueryItem};
use tokio::{net::TcpStream, runtime::Runtime};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{
    Event, Level, Metadata, Subscriber,
    field::{Field, Visit},
    span,
    subscriber::Interest,
};

type TdsClient = Client<Compat<TcpStream>>;

/// Connects to SQL Server with `tiberius`.
#[derive(Debug)]
pub struct MssqlBackend {
    host: String,
    port: u16,
    user: String,
    password: String,
    runtime: Arc<Runtime>,
}

impl MssqlBackend {
    /// A backend for `env`, driven on `runtime`.
    pub fn new(env: &ResolvedEnvironment, runtime: Arc<Runtime>) -> Self {
        Self {
            host: env.host.clone(),
            port: env.effective_port(),
            user: env.user.clone(),
            password: env.password.clone(),
            runtime,
        }
    }

    fn config(&self, database: Option<&str>) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));
        config.trust_cert();
        if let Some(db) = database {
            config.database(db);
        }
        config
    }
}

impl Backend for MssqlBackend {
    fn platform(&self) -> Platform {
        Platform::Mssql
    }

    fn open(&self, database: Option<&str>) -> Result<Box<dyn Session>, ExecutionError> {
        let config = self.config(database);
        let server = format!("{}:{}", self.host, self.port);
        log::debug!("Connecting to MSSQL at {} (database: {:?})", server, database);

        let client = self.runtime.block_on(async {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| ExecutionError::Connect {
                    server: server.clone(),
                    message: e.to_string(),
                })?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| ExecutionError::Connect {
                    server: server.clone(),
                    message: e.to_string(),
                })
        })?;

        Ok(Box::new(MssqlSession {
            client,
            runtime: self.runtime.clone(),
        }))
    }
}

/// One TDS connection.
pub struct MssqlSession {
    client: TdsClient,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for MssqlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlSession").finish_non_exhaustive()
    }
}

impl MssqlSession {
    /// Runs `sql`, keeping result sets and informational messages in arrival order.
    fn run_batch(&mut self, sql: &str) -> (Vec<BatchPiece>, Result<(), tiberius::error::Error>) {
        let messages = InfoMessages::default();
        let client = &mut self.client;
        let runtime = &self.runtime;
        let mut pieces: Vec<BatchPiece> = Vec::new();

        let result = tracing::subscriber::with_default(messages.clone(), || {
            runtime.block_on(async {
                let mut stream = client.simple_query(sql).await?;
                loop {
                    let item = stream.try_next().await;
                    pieces.extend(messages.drain().into_iter().map(BatchPiece::Message));
                    match item? {
                        None => break,
                        Some(QueryItem::Metadata(meta)) => {
                            let columns = meta
                                .columns()
                                .iter()
                                .map(|c| RenderColumn {
                                    name: c.name().to_string(),
                                    numeric: is_numeric_type(c.column_type()),
                                })
                                .collect();
                            pieces.push(BatchPiece::Rows(ResultSet::new(columns)));
                        }
                        Some(QueryItem::Row(row)) => {
                            let cells = row.into_iter().map(|data| cell_text(&data).unwrap_or_default()).collect();
                            let current = pieces.iter_mut().rev().find_map(|piece| match piece {
                                BatchPiece::Rows(set) => Some(set),
                                BatchPiece::Message(_) => None,
                            });
                            if let Some(set) = current {
                                set.rows.push(cells);
                            }
                        }
                    }
                }
                Ok::<_, tiberius::error::Error>(())
            })
        });
        pieces.extend(messages.drain().into_iter().map(BatchPiece::Message));
        (pieces, result)
    }

    /// Rows of a single-column-or-more query, NULLs as `None`.
    fn query_rows(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>, ExecutionError> {
        let client = &mut self.client;
        self.runtime
            .block_on(async {
                let mut stream = client.simple_query(sql).await?;
                let mut rows = Vec::new();
                while let Some(item) = stream.try_next().await? {
                    if let QueryItem::Row(row) = item {
                        rows.push(row.into_iter().map(|data| cell_text(&data)).collect());
                    }
                }
                Ok::<_, tiberius::error::Error>(rows)
            })
            .map_err(|e| ExecutionError::Server(format_error(&e)))
    }
}

impl Session for MssqlSession {
    fn execute_batch(&mut self, sql: &str) -> BatchResult {
        let (pieces, result) = self.run_batch(sql);
        let text = render_pieces(&pieces);
        match result {
            Ok(()) => Ok(BatchOutput { text }),
            Err(e) => Err(BatchError {
                message: format_error(&e),
                output: text,
            }),
        }
    }

    fn exec_return_code(&mut self, call: &str) -> Result<i32, ExecutionError> {
        let sql = format!(
            "declare @rc int\nexec @rc = {}\nselect convert(varchar(12), @rc)",
            call.trim().trim_start_matches("exec ").trim_start_matches("EXEC ")
        );
        let rows = self.query_rows(&sql)?;
        rows.iter()
            .rev()
            .find_map(|row| row.first().cloned().flatten())
            .and_then(|text| text.trim().parse().ok())
            .ok_or_else(|| ExecutionError::Protocol(format!("No return status from '{}'", call)))
    }

    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, ExecutionError> {
        let (database, _) = split_qualified(table);
        let catalog = database.map(|db| format!("[{}].", db)).unwrap_or_default();
        let sql = format!(
            "select c.name, t.name from {catalog}sys.columns c \
             join {catalog}sys.types t on c.user_type_id = t.user_type_id \
             where c.object_id = object_id('{table}') order by c.column_id",
            catalog = catalog,
            table = table.replace('\'', "''"),
        );
        Ok(self
            .query_rows(&sql)?
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter();
                match (cells.next().flatten(), cells.next().flatten()) {
                    (Some(name), Some(type_name)) => Some(ColumnInfo::new(name, type_name)),
                    _ => None,
                }
            })
            .collect())
    }

    fn bulk_insert(
        &mut self,
        table: &str,
        columns: &[ColumnInfo],
        rows: &mut dyn Iterator<Item = Vec<String>>,
    ) -> Result<u64, ExecutionError> {
        let column_list = columns
            .iter()
            .map(|c| format!("[{}]", c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut total = 0u64;

        while let Some((sql, count)) = next_insert(table, &column_list, rows) {
            let (_, result) = self.run_batch(&sql);
            result.map_err(|e| ExecutionError::Server(format_error(&e)))?;
            total += count as u64;
        }
        Ok(total)
    }

    fn bulk_export(
        &mut self,
        table: &str,
        sink: &mut dyn FnMut(Vec<String>) -> std::io::Result<()>,
    ) -> Result<u64, ExecutionError> {
        let client = &mut self.client;
        let sql = format!("select * from {}", table);
        self.runtime.block_on(async {
            let mut stream = client
                .simple_query(sql)
                .await
                .map_err(|e| ExecutionError::Server(format_error(&e)))?;
            let mut count = 0u64;
            while let Some(item) = stream
                .try_next()
                .await
                .map_err(|e| ExecutionError::Server(format_error(&e)))?
            {
                if let QueryItem::Row(row) = item {
                    sink(row.into_iter().map(|data| cell_text(&data).unwrap_or_default()).collect())?;
                    count += 1;
                }
            }
            Ok::<u64, ExecutionError>(count)
        })
    }

    fn close(self: Box<Self>) -> Result<(), ExecutionError> {
        let Self { client, runtime } = *self;
        runtime
            .block_on(client.close())
            .map_err(|e| ExecutionError::Protocol(e.to_string()))
    }
}

// --- INFORMATIONAL MESSAGES ---

/// Target of the driver's token-stream events.
const TOKEN_EVENT_TARGET: &str = "tiberius::tds::stream::token";

/// Environment-change events share the token target; none of them is server output.
const ENV_CHANGE_EVENTS: &[&str] = &[
    "Database change from ",
    "Packet size change from ",
    "SQL collation change",
    "Begin transaction",
    "Commit transaction",
    "Rollback transaction",
    "Defect transaction",
    "Server requested routing to ",
    "Fallback mirror server: ",
    "Ignored env change: ",
];

/// One part of a batch's output.
#[derive(Debug)]
enum BatchPiece {
    Message(String),
    Rows(ResultSet),
}

fn render_pieces(pieces: &[BatchPiece]) -> String {
    pieces
        .iter()
        .map(|piece| match piece {
            BatchPiece::Message(text) => text.clone(),
            BatchPiece::Rows(set) => set.render(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collects informational server messages while installed as the thread's
/// `tracing` dispatcher. Context-change notices are dropped.
#[derive(Debug, Clone, Default)]
struct InfoMessages {
    captured: Arc<Mutex<Vec<String>>>,
}

impl InfoMessages {
    fn drain(&self) -> Vec<String> {
        self.captured
            .lock()
            .map(|mut captured| std::mem::take(&mut *captured))
            .unwrap_or_default()
    }
}

impl Subscriber for InfoMessages {
    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        if self.enabled(metadata) {
            Interest::sometimes()
        } else {
            Interest::never()
        }
    }

    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() == Level::INFO && metadata.target() == TOKEN_EVENT_TARGET
    }

    fn new_span(&self, _: &span::Attributes<'_>) -> span::Id {
        span::Id::from_u64(1)
    }

    fn record(&self, _: &span::Id, _: &span::Record<'_>) {}

    fn record_follows_from(&self, _: &span::Id, _: &span::Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut field = MessageField::default();
        event.record(&mut field);
        let Some(text) = field.0 else { return };
        if ENV_CHANGE_EVENTS.iter().any(|prefix| text.starts_with(prefix)) || is_context_notice(&text) {
            return;
        }
        if let Ok(mut captured) = self.captured.lock() {
            captured.push(text);
        }
    }

    fn enter(&self, _: &span::Id) {}

    fn exit(&self, _: &span::Id) {}
}

#[derive(Default)]
struct MessageField(Option<String>);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{:?}", value));
        }
    }
}

/// `Msg <n>, Level <class>, State <s>, Line <l>` followed by the message.
fn format_error(error: &tiberius::error::Error) -> String {
    match error {
        tiberius::error::Error::Server(token) => format!(
            "Msg {}, Level {}, State {}, Line {}\n{}",
            token.code(),
            token.class(),
            token.state(),
            token.line(),
            token.message()
        ),
        other => other.to_string(),
    }
}

/// The next multi-row `INSERT` drawn from `rows`, with its row count.
/// `None` once `rows` is exhausted.
fn next_insert(
    table: &str,
    column_list: &str,
    rows: &mut dyn Iterator<Item = Vec<String>>,
) -> Option<(String, usize)> {
    let chunk: Vec<String> = (&mut *rows)
        .take(INSERT_ROWS_PER_STATEMENT)
        .map(|row| format!("({})", row.iter().map(|v| quote(v)).collect::<Vec<_>>().join(", ")))
        .collect();
    if chunk.is_empty() {
        return None;
    }
    let sql = format!("insert into {} ({}) values\n{}", table, column_list, chunk.join(",\n"));
    Some((sql, chunk.len()))
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_numeric_type(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::Int1
            | ColumnType::Int2
            | ColumnType::Int4
            | ColumnType::Int8
            | ColumnType::Intn
            | ColumnType::Float4
            | ColumnType::Float8
            | ColumnType::Floatn
            | ColumnType::Decimaln
            | ColumnType::Numericn
            | ColumnType::Money
            | ColumnType::Money4
            | ColumnType::Bit
            | ColumnType::Bitn
    )
}

/// Text form of one cell, `None` for NULL.
fn cell_text(data: &ColumnData<'static>) -> Option<String> {
    match data {
        ColumnData::U8(v) => v.map(|v| v.to_string()),
        ColumnData::I16(v) => v.map(|v| v.to_string()),
        ColumnData::I32(v) => v.map(|v| v.to_string()),
        ColumnData::I64(v) => v.map(|v| v.to_string()),
        ColumnData::F32(v) => v.map(|v| v.to_string()),
        ColumnData::F64(v) => v.map(|v| v.to_string()),
        ColumnData::Bit(v) => v.map(|v| if v { "1" } else { "0" }.to_string()),
        ColumnData::String(v) => v.as_ref().map(|s| s.to_string()),
        ColumnData::Guid(v) => v.as_ref().map(|g| g.to_string()),
        ColumnData::Numeric(v) => v.as_ref().map(|n| n.to_string()),
        ColumnData::Binary(v) => v.as_ref().map(|b| format!("0x{}", hex::encode(b))),
        ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_) => chrono::NaiveDateTime::from_sql(data)
            .ok()
            .flatten()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        ColumnData::Date(_) => chrono::NaiveDate::from_sql(data)
            .ok()
            .flatten()
            .map(|d| d.format("%Y-%m-%d").to_string()),
        ColumnData::Time(_) => chrono::NaiveTime::from_sql(data)
            .ok()
            .flatten()
            .map(|t| t.format("%H:%M:%S%.3f").to_string()),
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<chrono::FixedOffset>::from_sql(data)
            .ok()
            .flatten()
            .map(|dt| dt.to_rfc3339()),
        ColumnData::Xml(v) => v.as_ref().map(|x| format!("{:?}", x)),
    }
}
