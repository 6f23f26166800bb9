//! In-memory database used by the engine's unit tests.

use std::cell::RefCell;

use chrono::Utc;
use strata_common::{Error, ExecutionError, Result, Version};

use crate::database::{ColumnInfo, Database, IndexInfo, TableInfo};
use crate::log::{LogEntry, LogStore};

#[derive(Default)]
struct State {
    tables: Vec<TableInfo>,
    executed: Vec<String>,
    log: Vec<LogEntry>,
    lock: Option<String>,
    failures: Vec<(String, String)>,
    describe_failure: Option<String>,
    snapshot: Option<(usize, Vec<LogEntry>)>,
}

/// Records statements instead of running them. Schema only changes through
/// the `add_*`/`put_table` helpers.
pub struct FakeDatabase {
    state: RefCell<State>,
    transactional_ddl: bool,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State::default()),
            transactional_ddl: true,
        }
    }

    pub fn without_transactional_ddl(mut self) -> Self {
        self.transactional_ddl = false;
        self
    }

    pub fn put_table(&self, info: TableInfo) {
        let mut state = self.state.borrow_mut();
        state.tables.retain(|t| !t.name.eq_ignore_ascii_case(&info.name));
        state.tables.push(info);
    }

    pub fn add_table(&self, name: &str, columns: &[&str]) {
        self.put_table(TableInfo {
            name: name.to_string(),
            columns: columns.iter().map(|c| column(c)).collect(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            sql: None,
            triggers: Vec::new(),
        });
    }

    pub fn add_column(&self, table: &str, name: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(info) = state.tables.iter_mut().find(|t| t.name == table) {
            info.columns.push(column(name));
        }
    }

    pub fn add_index(&self, table: &str, name: &str, columns: &[&str]) {
        let mut state = self.state.borrow_mut();
        if let Some(info) = state.tables.iter_mut().find(|t| t.name == table) {
            info.indexes.push(IndexInfo {
                name: name.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                unique: false,
                sql: Some(format!(
                    "CREATE INDEX {name} ON {table} ({})",
                    columns.join(", ")
                )),
            });
        }
    }

    /// Fail any statement containing `needle` with `message`.
    pub fn fail_on(&self, needle: &str, message: &str) {
        self.state
            .borrow_mut()
            .failures
            .push((needle.to_string(), message.to_string()));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.borrow_mut();
        state.failures.clear();
        state.describe_failure = None;
    }

    pub fn fail_describe(&self, message: &str) {
        self.state.borrow_mut().describe_failure = Some(message.to_string());
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.borrow().executed.clone()
    }

    pub fn logged_versions(&self) -> Vec<u64> {
        let mut versions: Vec<u64> = self.state.borrow().log.iter().map(|e| e.version.get()).collect();
        versions.sort_unstable();
        versions
    }

    pub fn lock_holder(&self) -> Option<String> {
        self.state.borrow().lock.clone()
    }
}

fn column(name: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        sql_type: "INTEGER".into(),
        not_null: false,
        default: None,
        primary_key: 0,
    }
}

impl Database for FakeDatabase {
    fn describe_table(&self, table: &str) -> Result<Option<TableInfo>> {
        let state = self.state.borrow();
        if let Some(message) = &state.describe_failure {
            return Err(Error::Database(message.clone()));
        }
        Ok(state
            .tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(table))
            .cloned())
    }

    fn execute_statement(&self, sql: &str) -> std::result::Result<(), ExecutionError> {
        let mut state = self.state.borrow_mut();
        if let Some((_, message)) = state.failures.iter().find(|(needle, _)| sql.contains(needle.as_str())) {
            return Err(ExecutionError::new(sql, message.clone()));
        }
        state.executed.push(sql.to_string());
        Ok(())
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.snapshot.is_some() {
            return Err(Error::Database("transaction already open".into()));
        }
        let snapshot = (state.executed.len(), state.log.clone());
        state.snapshot = Some(snapshot);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.state.borrow_mut().snapshot = None;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some((executed, log)) = state.snapshot.take() {
            state.executed.truncate(executed);
            state.log = log;
        }
        Ok(())
    }

    fn supports_transactional_ddl(&self) -> bool {
        self.transactional_ddl
    }
}

impl LogStore for FakeDatabase {
    fn ensure_log(&self) -> Result<()> {
        Ok(())
    }

    fn read_applied(&self) -> Result<Vec<LogEntry>> {
        Ok(self.state.borrow().log.clone())
    }

    fn append(&self, entry: &LogEntry) -> Result<()> {
        self.state.borrow_mut().log.push(entry.clone());
        Ok(())
    }

    fn remove(&self, version: Version) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        let before = state.log.len();
        state.log.retain(|e| e.version != version);
        Ok(state.log.len() != before)
    }

    fn acquire_lock(&self, owner: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        match &state.lock {
            Some(holder) if holder != owner => Err(Error::ConcurrentRun {
                owner: holder.clone(),
                acquired_at: Utc::now().to_rfc3339(),
            }),
            _ => {
                state.lock = Some(owner.to_string());
                Ok(())
            }
        }
    }

    fn release_lock(&self, owner: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.lock.as_deref() == Some(owner) {
            state.lock = None;
        }
        Ok(())
    }

    fn force_release_lock(&self) -> Result<bool> {
        Ok(self.state.borrow_mut().lock.take().is_some())
    }
}
