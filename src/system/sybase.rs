//! Sybase ASE backend.
//!
//! There is no native client library, so a session is a long-lived `isql`
//! child process fed through stdin. After each batch a `print` sentinel is
//! sent; everything read up to the sentinel belongs to that batch. Bulk
//! transfer goes through `bcp` in character mode.

use crate::{
    CancellationToken,
    models::{Platform, ResolvedEnvironment},
    system::{
        backend::{
            Backend, BatchError, BatchOutput, BatchResult, ColumnInfo, Session, is_context_notice, split_qualified,
        },
        bulk::split_fields,
        executor::{ExecutionError, display_command, run_and_capture, spawn_session},
    },
};
use lazy_static::lazy_static;
use regex::Regex;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    process::{Child, ChildStdin, ChildStdout},
};

const ISQL_PROGRAM: &str = "isql";
const BCP_PROGRAM: &str = "bcp";
const BATCH_END_MARKER: &str = "__IBS_BATCH_END_";
const RETURN_CODE_MARKER: &str = "__IBS_RC__";
const COLUMN_MARKER: &str = "__IBS_COL__";
const BCP_BATCH_SIZE: &str = "1000";

lazy_static! {
    static ref PROMPT_PREFIX: Regex = Regex::new(r"^(\d+> ?)+").expect("Invalid prompt regex");
    static ref MESSAGE_HEADER: Regex =
        Regex::new(r"^Msg (\d+), Level (\d+), State (\d+):?").expect("Invalid message header regex");
}

/// Msg numbers that only report a session context change.
const CONTEXT_NOTICES: &[u32] = &[5701, 5703, 5704];

/// Drives `isql` and `bcp` for one server.
#[derive(Debug, Clone)]
pub struct SybaseBackend {
    server: String,
    user: String,
    password: String,
    cancellation_token: CancellationToken,
}

impl SybaseBackend {
    /// A backend for `env`; `bcp` runs observe `cancellation_token`.
    pub fn new(env: &ResolvedEnvironment, cancellation_token: CancellationToken) -> Self {
        Self {
            server: env.host.clone(),
            user: env.user.clone(),
            password: env.password.clone(),
            cancellation_token,
        }
    }

    fn login_args(&self) -> Vec<String> {
        vec![
            "-U".to_string(),
            self.user.clone(),
            "-P".to_string(),
            self.password.clone(),
            "-S".to_string(),
            self.server.clone(),
        ]
    }
}

impl Backend for SybaseBackend {
    fn platform(&self) -> Platform {
        Platform::Sybase
    }

    fn open(&self, database: Option<&str>) -> Result<Box<dyn Session>, ExecutionError> {
        let mut args = self.login_args();
        // -n: no line numbers or prompts on echoed input.
        args.extend(["-n".to_string(), "-w".to_string(), "4096".to_string()]);
        if let Some(db) = database {
            args.extend(["-D".to_string(), db.to_string()]);
        }
        log::debug!("Starting session: {}", display_command(ISQL_PROGRAM, &args));

        let mut child = spawn_session(ISQL_PROGRAM, &args)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(ExecutionError::Protocol("isql pipes were not available".to_string()));
        };

        let mut session = SybaseSession {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            batches_sent: 0,
            database: database.map(str::to_string),
            backend: self.clone(),
        };

        // A login failure surfaces as an early exit before the first sentinel.
        session
            .execute_batch("set nocount off")
            .map_err(|e| ExecutionError::Connect {
                server: self.server.clone(),
                message: e.full_text(),
            })?;
        Ok(Box::new(session))
    }
}

/// One `isql` child process.
pub struct SybaseSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    batches_sent: u64,
    database: Option<String>,
    backend: SybaseBackend,
}

impl std::fmt::Debug for SybaseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SybaseSession")
            .field("pid", &self.child.id())
            .field("batches_sent", &self.batches_sent)
            .field("database", &self.database)
            .finish()
    }
}

impl SybaseSession {
    /// Sends one batch followed by its sentinel and reads the output up to it.
    fn round_trip(&mut self, sql: &str, marker: &str) -> Result<Vec<String>, String> {
        let mut text = String::with_capacity(sql.len() + 64);
        text.push_str(sql.trim_end());
        text.push_str("\ngo\n");
        text.push_str(&format!("print '{}'\ngo\n", marker));
        exchange(&mut self.stdin, &mut self.stdout, &text, marker)
    }

    fn qualified(&self, table: &str) -> String {
        match (split_qualified(table), &self.database) {
            ((Some(_), _), _) | ((None, _), None) => table.to_string(),
            ((None, name), Some(db)) => format!("{}..{}", db, name),
        }
    }

    fn run_bcp(&self, table: &str, direction: &str, data_file: &std::path::Path) -> Result<String, ExecutionError> {
        let mut args = vec![
            self.qualified(table),
            direction.to_string(),
            data_file.display().to_string(),
            "-c".to_string(),
            "-t".to_string(),
            "\\t".to_string(),
            "-r".to_string(),
            "\\n".to_string(),
            "-b".to_string(),
            BCP_BATCH_SIZE.to_string(),
        ];
        args.extend(self.backend.login_args());
        run_and_capture(BCP_PROGRAM, &args, &self.backend.cancellation_token)
    }
}

/// Writes `text` on a helper thread while reading lines up to `marker`.
///
/// The client echoes output while it still consumes input, so a large batch
/// would fill the output pipe and stall both sides if written first.
fn exchange<W, R>(input: &mut W, output: &mut R, text: &str, marker: &str) -> Result<Vec<String>, String>
where
    W: Write + Send,
    R: BufRead,
{
    std::thread::scope(|scope| {
        let writer = scope.spawn(move || -> std::io::Result<()> {
            input.write_all(text.as_bytes())?;
            input.flush()
        });
        let read = read_until(output, marker);
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("isql writer thread panicked")));
        match (read, written) {
            (Ok(lines), _) => Ok(lines),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(w)) => Err(format!("{}\nFailed to send batch to isql: {}", e, w)),
        }
    })
}

/// Reads lines up to `marker`, returning them without prompt prefixes.
fn read_until<R: BufRead>(output: &mut R, marker: &str) -> Result<Vec<String>, String> {
    let mut lines = Vec::new();
    let mut buffer = String::new();
    loop {
        buffer.clear();
        match output.read_line(&mut buffer) {
            Ok(0) => return Err(format!("isql ended unexpectedly.\n{}", lines.join("\n"))),
            Ok(_) => {
                let line = PROMPT_PREFIX.replace(buffer.trim_end_matches(['\r', '\n']), "");
                if line.trim() == marker {
                    return Ok(lines);
                }
                lines.push(line.into_owned());
            }
            Err(e) => return Err(format!("Failed to read from isql: {}", e)),
        }
    }
}

/// Separates server output from messages and decides whether the batch failed.
fn interpret(lines: Vec<String>) -> BatchResult {
    let mut kept: Vec<String> = Vec::with_capacity(lines.len());
    let mut failure: Option<String> = None;
    let mut skipping_notice = false;

    for line in lines {
        if let Some(caps) = MESSAGE_HEADER.captures(&line) {
            let number: u32 = caps[1].parse().unwrap_or(0);
            let level: u32 = caps[2].parse().unwrap_or(0);
            skipping_notice = CONTEXT_NOTICES.contains(&number);
            if skipping_notice {
                continue;
            }
            if level > crate::constants::INFO_SEVERITY_MAX && failure.is_none() {
                failure = Some(line.clone());
            }
            kept.push(line);
            continue;
        }
        if skipping_notice {
            if line.trim().is_empty() {
                skipping_notice = false;
            }
            continue;
        }
        if is_context_notice(&line) {
            continue;
        }
        kept.push(line);
    }

    let text = kept.join("\n");
    match failure {
        None => Ok(BatchOutput { text }),
        Some(header) => Err(BatchError {
            message: format!("Batch failed ({})", header),
            output: text,
        }),
    }
}

impl Session for SybaseSession {
    fn execute_batch(&mut self, sql: &str) -> BatchResult {
        self.batches_sent += 1;
        let marker = format!("{}{}__", BATCH_END_MARKER, self.batches_sent);
        let lines = self.round_trip(sql, &marker).map_err(BatchError::new)?;
        interpret(lines)
    }

    fn exec_return_code(&mut self, call: &str) -> Result<i32, ExecutionError> {
        let sql = format!(
            "declare @rc int, @txt varchar(12)\nexec @rc = {}\nselect @txt = convert(varchar(12), @rc)\nprint '{}%1!', @txt",
            call.trim().trim_start_matches("exec ").trim_start_matches("EXEC "),
            RETURN_CODE_MARKER
        );
        let output = self
            .execute_batch(&sql)
            .map_err(|e| ExecutionError::Server(e.full_text()))?;
        output
            .text
            .lines()
            .find_map(|line| line.trim().strip_prefix(RETURN_CODE_MARKER))
            .and_then(|code| code.trim().parse().ok())
            .ok_or_else(|| ExecutionError::Protocol(format!("No return status from '{}'", call)))
    }

    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, ExecutionError> {
        let (database, _) = split_qualified(table);
        let catalog = database.map(|db| format!("{}..", db)).unwrap_or_default();
        let sql = format!(
            "select '{marker}' + c.name + '|' + t.name from {catalog}syscolumns c, {catalog}systypes t \
             where c.id = object_id('{table}') and c.usertype = t.usertype order by c.colid",
            marker = COLUMN_MARKER,
            catalog = catalog,
            table = table.replace('\'', "''"),
        );
        let output = self
            .execute_batch(&sql)
            .map_err(|e| ExecutionError::Server(e.full_text()))?;
        Ok(output
            .text
            .lines()
            .filter_map(|line| line.trim().strip_prefix(COLUMN_MARKER))
            .filter_map(|pair| pair.split_once('|'))
            .map(|(name, type_name)| ColumnInfo::new(name.trim(), type_name.trim()))
            .collect())
    }

    fn bulk_insert(
        &mut self,
        table: &str,
        _columns: &[ColumnInfo],
        rows: &mut dyn Iterator<Item = Vec<String>>,
    ) -> Result<u64, ExecutionError> {
        let staged = tempfile::NamedTempFile::new()?;
        let mut count = 0u64;
        {
            let mut writer = BufWriter::new(staged.as_file());
            for row in rows {
                writeln!(writer, "{}", row.join("\t"))?;
                count += 1;
            }
            writer.flush()?;
        }
        let report = self.run_bcp(table, "in", staged.path())?;
        log::debug!("bcp in {}: {}", table, report.trim());
        Ok(count)
    }

    fn bulk_export(
        &mut self,
        table: &str,
        sink: &mut dyn FnMut(Vec<String>) -> std::io::Result<()>,
    ) -> Result<u64, ExecutionError> {
        let staged = tempfile::NamedTempFile::new()?;
        let report = self.run_bcp(table, "out", staged.path())?;
        log::debug!("bcp out {}: {}", table, report.trim());

        let mut count = 0u64;
        for line in BufReader::new(File::open(staged.path())?).lines() {
            sink(split_fields(&line?))?;
            count += 1;
        }
        Ok(count)
    }

    fn close(mut self: Box<Self>) -> Result<(), ExecutionError> {
        self.stdin.write_all(b"quit\n")?;
        self.stdin.flush()?;
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for SybaseSession {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            log::debug!("Killing isql session (PID: {})", self.child.id());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_prompt_prefixes_are_stripped() {
        assert_eq!(PROMPT_PREFIX.replace("1> 2> 3> hello", ""), "hello");
        assert_eq!(PROMPT_PREFIX.replace("10>hello", ""), "hello");
    }

    #[test]
    fn test_read_stops_at_the_marker() {
        let mut output = std::io::Cursor::new("1> a\n2> b\n__END__\nc\n");
        assert_eq!(read_until(&mut output, "__END__").unwrap(), vec!["a", "b"]);

        let mut truncated = std::io::Cursor::new("a\n");
        assert!(read_until(&mut truncated, "__END__").unwrap_err().contains("ended unexpectedly"));
    }

    #[cfg(unix)]
    #[test]
    fn test_large_batch_does_not_stall_an_echoing_client() {
        use std::process::{Command, Stdio};

        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut input = child.stdin.take().unwrap();
        let mut output = BufReader::new(child.stdout.take().unwrap());

        let mut text = "insert t values ('some padding to fill the pipe quickly')\n".repeat(50_000);
        text.push_str("__END__\n");
        let lines = exchange(&mut input, &mut output, &text, "__END__").unwrap();

        assert_eq!(lines.len(), 50_000);
        drop(input);
        child.wait().unwrap();
    }

    #[test]
    fn test_severe_message_fails_the_batch() {
        let result = interpret(lines(
            "Msg 208, Level 16, State 1:\nServer 'SYB', Line 1:\nnope not found.\n",
        ));
        let err = result.unwrap_err();
        assert!(err.message.contains("Msg 208"));
        assert!(err.output.contains("nope not found"));
    }

    #[test]
    fn test_informational_messages_are_kept() {
        let result = interpret(lines("Msg 0, Level 10, State 1:\nhello world\n"));
        assert!(result.unwrap().text.contains("hello world"));
    }

    #[test]
    fn test_context_notices_are_filtered() {
        let output = interpret(lines(
            "Msg 5701, Level 10, State 2:\nServer 'SYB', Line 1:\nChanged database context to 'x'.\n\nrow text\n",
        ))
        .unwrap();
        assert_eq!(output.text.trim(), "row text");
    }
}
