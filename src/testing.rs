// src/testing.rs

//! Fixtures shared by the unit tests: a throwaway source tree, a resolved
//! environment pointing at it, a captured output target, and an in-memory
//! backend that records every statement it receives.

use crate::{
    models::{Platform, ResolvedEnvironment},
    system::{
        backend::{Backend, BatchError, BatchOutput, BatchResult, ColumnInfo, Session},
        executor::ExecutionError,
        output::Output,
    },
};
use std::{
    cell::{Ref, RefCell},
    collections::{HashMap, HashSet},
    io::Write,
    path::Path,
    rc::Rc,
};
use tempfile::TempDir;

/// `varchar` columns with the given names.
pub(crate) fn text_columns(names: &[&str]) -> Vec<ColumnInfo> {
    names.iter().map(|n| ColumnInfo::new(*n, "varchar")).collect()
}

// --- SOURCE TREE ---

pub(crate) fn environment(root: &Path, platform: Platform) -> ResolvedEnvironment {
    ResolvedEnvironment {
        name: "dev".to_string(),
        host: "dbhost".to_string(),
        port: None,
        user: "sa".to_string(),
        password: "secret".to_string(),
        platform,
        company: "101".to_string(),
        language: "1".to_string(),
        sql_source_root: root.to_path_buf(),
        raw_mode: false,
        is_named_profile: true,
    }
}

/// Writes `files` into `<tmp>/CSS/Setup/`. Names may contain `/`.
pub(crate) fn setup_sources(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let setup = dir.path().join("CSS").join("Setup");
    std::fs::create_dir_all(&setup).unwrap();
    for (name, content) in files {
        let path = setup.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
    dir
}

/// Writes a file relative to the tree root and returns its path.
pub(crate) fn write_source(dir: &TempDir, relative: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

// --- OUTPUT CAPTURE ---

#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub(crate) fn captured_output() -> (Output, SharedBuffer) {
    let buffer = SharedBuffer::default();
    (Output::from_writer(Box::new(buffer.clone())), buffer)
}

// --- RECORDING BACKEND ---

#[derive(Debug, Clone, Default)]
pub(crate) struct MockTable {
    pub(crate) columns: Vec<ColumnInfo>,
    pub(crate) rows: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// `(current database, batch text)` in execution order.
    pub(crate) executed: Vec<(Option<String>, String)>,
    pub(crate) calls: Vec<String>,
    pub(crate) fail_patterns: Vec<String>,
    pub(crate) opened: Vec<Option<String>>,
    pub(crate) closed: usize,
    pub(crate) tables: HashMap<String, MockTable>,
    pub(crate) applied_upgrades: HashSet<String>,
    pub(crate) upgrade_control_missing: bool,
}

/// Simulates just enough server behavior for orchestration tests:
/// `use`, deletes on known tables, the upgrade check and its completion update.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockBackend {
    state: Rc<RefCell<MockState>>,
}

impl MockBackend {
    pub(crate) fn state(&self) -> Ref<'_, MockState> {
        self.state.borrow()
    }

    /// Batches containing `pattern` fail.
    pub(crate) fn fail_on(&self, pattern: &str) {
        self.state.borrow_mut().fail_patterns.push(pattern.to_string());
    }

    pub(crate) fn executed_sql(&self) -> Vec<String> {
        self.state().executed.iter().map(|(_, sql)| sql.clone()).collect()
    }

    pub(crate) fn create_table(&self, name: &str, columns: Vec<ColumnInfo>) {
        self.state.borrow_mut().tables.insert(
            name.to_string(),
            MockTable {
                columns,
                rows: Vec::new(),
            },
        );
    }

    pub(crate) fn insert_rows(&self, name: &str, rows: Vec<Vec<String>>) {
        if let Some(table) = self.state.borrow_mut().tables.get_mut(name) {
            table.rows.extend(rows);
        }
    }

    pub(crate) fn table_rows(&self, name: &str) -> Vec<Vec<String>> {
        self.state()
            .tables
            .get(name)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_upgrade_control_missing(&self) {
        self.state.borrow_mut().upgrade_control_missing = true;
    }
}

impl Backend for MockBackend {
    fn platform(&self) -> Platform {
        Platform::Sybase
    }

    fn open(&self, database: Option<&str>) -> Result<Box<dyn Session>, ExecutionError> {
        self.state.borrow_mut().opened.push(database.map(str::to_string));
        Ok(Box::new(MockSession {
            state: self.state.clone(),
            database: database.map(str::to_string),
        }))
    }
}

#[derive(Debug)]
pub(crate) struct MockSession {
    state: Rc<RefCell<MockState>>,
    database: Option<String>,
}

fn last_quoted(text: &str) -> Option<String> {
    let end = text.rfind('\'')?;
    let start = text[..end].rfind('\'')?;
    Some(text[start + 1..end].to_string())
}

impl Session for MockSession {
    fn execute_batch(&mut self, sql: &str) -> BatchResult {
        let mut state = self.state.borrow_mut();
        state.executed.push((self.database.clone(), sql.to_string()));

        if let Some(pattern) = state.fail_patterns.iter().find(|p| sql.contains(p.as_str())) {
            return Err(BatchError::new(format!("Msg 50000, Level 16, State 1\nfailed on {}", pattern)));
        }

        let trimmed = sql.trim();
        let lower = trimmed.to_ascii_lowercase();
        if let Some(db) = lower.strip_prefix("use ") {
            self.database = Some(db.trim().to_string());
        } else if let Some(table) = lower.strip_prefix("delete from ") {
            let name = trimmed[trimmed.len() - table.len()..].trim();
            if let Some(t) = state.tables.get_mut(name) {
                t.rows.clear();
            }
        } else if lower.contains("end_dt") && lower.contains("upgrade_no") {
            if let Some(id) = last_quoted(trimmed) {
                state.applied_upgrades.insert(id);
            }
        }

        Ok(BatchOutput {
            text: format!("ok: {}", trimmed.lines().next().unwrap_or_default()),
        })
    }

    fn exec_return_code(&mut self, call: &str) -> Result<i32, ExecutionError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call.to_string());
        if !call.contains("upgrade_check") {
            return Ok(0);
        }
        if state.upgrade_control_missing {
            return Ok(1);
        }
        let applied = last_quoted(call).is_some_and(|id| state.applied_upgrades.contains(&id));
        Ok(if applied { 2 } else { 0 })
    }

    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, ExecutionError> {
        Ok(self
            .state
            .borrow()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    fn bulk_insert(
        &mut self,
        table: &str,
        _columns: &[ColumnInfo],
        rows: &mut dyn Iterator<Item = Vec<String>>,
    ) -> Result<u64, ExecutionError> {
        let mut state = self.state.borrow_mut();
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| ExecutionError::Server(format!("no table {}", table)))?;
        let before = target.rows.len();
        target.rows.extend(rows);
        Ok((target.rows.len() - before) as u64)
    }

    fn bulk_export(
        &mut self,
        table: &str,
        sink: &mut dyn FnMut(Vec<String>) -> std::io::Result<()>,
    ) -> Result<u64, ExecutionError> {
        let rows = self
            .state
            .borrow()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| ExecutionError::Server(format!("no table {}", table)))?;
        for row in &rows {
            sink(row.clone())?;
        }
        Ok(rows.len() as u64)
    }

    fn close(self: Box<Self>) -> Result<(), ExecutionError> {
        self.state.borrow_mut().closed += 1;
        Ok(())
    }
}

// --- RUN FIXTURE ---

/// Option sources used when a test does not bring its own.
pub(crate) const DEFAULT_SOURCES: &[(&str, &str)] = &[
    ("options.101", "v: dbtbl <<sbnmaster>>\nv: dbrpt <<sbnreport>>\nc: feat +\n"),
    ("table_locations", "-> users &dbtbl& user accounts\n"),
];

/// A built option set over a temporary tree, a recording backend and captured output.
pub(crate) struct Fixture {
    pub(crate) dir: TempDir,
    pub(crate) env: ResolvedEnvironment,
    pub(crate) options: crate::core::options::OptionSet,
    pub(crate) backend: MockBackend,
    pub(crate) output: Output,
    pub(crate) buffer: SharedBuffer,
    pub(crate) token: crate::CancellationToken,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_sources(DEFAULT_SOURCES)
    }

    pub(crate) fn with_sources(files: &[(&str, &str)]) -> Self {
        let dir = setup_sources(files);
        let env = environment(dir.path(), Platform::Sybase);
        let mut options = crate::core::options::OptionSet::new(
            &env,
            Box::new(crate::core::cache::MemoryOptionStore::default()),
            std::time::Duration::from_secs(3600),
        );
        options.build(false).unwrap();
        let (output, buffer) = captured_output();
        Self {
            dir,
            env,
            options,
            backend: MockBackend::default(),
            output,
            buffer,
            token: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub(crate) fn ctx(&mut self) -> crate::core::context::RunContext<'_> {
        crate::core::context::RunContext {
            env: &self.env,
            options: &self.options,
            backend: &self.backend,
            output: &mut self.output,
            cancellation_token: &self.token,
        }
    }

    pub(crate) fn write(&self, relative: &str, content: &str) -> std::path::PathBuf {
        write_source(&self.dir, relative, content)
    }

    pub(crate) fn printed(&self) -> String {
        self.buffer.contents()
    }
}
