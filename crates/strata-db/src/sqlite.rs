use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use strata_common::{Error, ExecutionError, Result, Version};
use strata_config::{DatabaseConfig, LogConfig};
use strata_engine::{
    ColumnInfo, Database, ForeignKeyInfo, IndexInfo, LogEntry, LogStore, TableInfo,
};
use strata_security::IdentifierValidator;
use tracing::{debug, info, warn};

/// A SQLite file acting as both the migration target and the log store.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    log_table: String,
    lock_table: String,
}

impl SqliteDatabase {
    pub fn open(config: &DatabaseConfig, log: &LogConfig) -> Result<Self> {
        let path = config.path.as_path();
        info!("opening database at {}", path.display());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        Self::with_connection(conn, log)
    }

    pub fn open_path(path: &Path, log: &LogConfig) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.to_path_buf(),
            ..DatabaseConfig::default()
        };
        Self::open(&config, log)
    }

    pub fn in_memory(log: &LogConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::with_connection(conn, log)
    }

    fn with_connection(conn: Connection, log: &LogConfig) -> Result<Self> {
        // Table rebuilds drop and recreate parents, which must not cascade.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=OFF;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            log_table: IdentifierValidator::quote_identifier(&log.table),
            lock_table: IdentifierValidator::quote_identifier(&log.lock_table),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database connection lock poisoned".into()))
    }

    fn columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut stmt = conn
            .prepare(
                "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
            )
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    sql_type: row.get(1)?,
                    not_null: row.get::<_, i64>(2)? != 0,
                    default: row.get(3)?,
                    primary_key: row.get(4)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to read columns of {table}: {e}")))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(format!("failed to read column row: {e}")))
    }

    fn indexes(conn: &Connection, table: &str) -> Result<Vec<IndexInfo>> {
        let mut stmt = conn
            .prepare(
                "SELECT l.name, l.\"unique\", m.sql FROM pragma_index_list(?1) AS l
                 LEFT JOIN sqlite_master AS m ON m.type = 'index' AND m.name = l.name
                 ORDER BY l.seq",
            )
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let listed = stmt
            .query_map(params![table], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)? != 0,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to list indexes of {table}: {e}")))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(format!("failed to read index row: {e}")))?;

        let mut columns_stmt = conn
            .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let mut indexes = Vec::with_capacity(listed.len());
        for (name, unique, sql) in listed {
            // Expression columns come back as NULL.
            let columns = columns_stmt
                .query_map(params![name], |row| row.get::<_, Option<String>>(0))
                .map_err(|e| Error::Database(format!("failed to read index {name}: {e}")))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::Database(format!("failed to read index column: {e}")))?
                .into_iter()
                .flatten()
                .collect();
            indexes.push(IndexInfo {
                name,
                columns,
                unique,
                sql,
            });
        }
        Ok(indexes)
    }

    fn foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete
                 FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
            )
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![table], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to read foreign keys of {table}: {e}")))?;

        let mut keys: Vec<(i64, ForeignKeyInfo)> = Vec::new();
        for row in rows {
            let (id, parent, from, to, on_update, on_delete) =
                row.map_err(|e| Error::Database(format!("failed to read foreign key row: {e}")))?;
            // Composite keys arrive as consecutive rows sharing an id.
            if keys.last().is_some_and(|(last, _)| *last == id) {
                if let Some((_, key)) = keys.last_mut() {
                    key.columns.push(from);
                    key.references_columns.extend(to);
                }
                continue;
            }
            keys.push((
                id,
                ForeignKeyInfo {
                    columns: vec![from],
                    references_table: parent,
                    references_columns: to.into_iter().collect(),
                    on_update,
                    on_delete,
                },
            ));
        }
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }

    fn triggers(conn: &Connection, table: &str) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare(
                "SELECT sql FROM sqlite_master
                 WHERE type = 'trigger' AND tbl_name = ?1 COLLATE NOCASE AND sql IS NOT NULL
                 ORDER BY rowid",
            )
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        stmt.query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to list triggers of {table}: {e}")))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(format!("failed to read trigger row: {e}")))
    }
}

impl Database for SqliteDatabase {
    fn describe_table(&self, table: &str) -> Result<Option<TableInfo>> {
        let conn = self.connection()?;
        let found: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                params![table],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to inspect table {table}: {e}")))?;
        let Some((name, sql)) = found else {
            return Ok(None);
        };

        Ok(Some(TableInfo {
            columns: Self::columns(&conn, &name)?,
            indexes: Self::indexes(&conn, &name)?,
            foreign_keys: Self::foreign_keys(&conn, &name)?,
            triggers: Self::triggers(&conn, &name)?,
            sql,
            name,
        }))
    }

    fn execute_statement(&self, sql: &str) -> std::result::Result<(), ExecutionError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ExecutionError::new(sql, "database connection lock poisoned"))?;
        conn.execute_batch(sql)
            .map_err(|e| ExecutionError::new(sql, e.to_string()))
    }

    fn begin(&self) -> Result<()> {
        self.connection()?
            .execute_batch("BEGIN")
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))
    }

    fn commit(&self) -> Result<()> {
        self.connection()?
            .execute_batch("COMMIT")
            .map_err(|e| Error::Database(format!("failed to commit transaction: {e}")))
    }

    fn rollback(&self) -> Result<()> {
        self.connection()?
            .execute_batch("ROLLBACK")
            .map_err(|e| Error::Database(format!("failed to roll back transaction: {e}")))
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }
}

impl LogStore for SqliteDatabase {
    fn ensure_log(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {log} (
                version TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS {lock} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                owner TEXT NOT NULL,
                acquired_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
            log = self.log_table,
            lock = self.lock_table,
        ))
        .map_err(|e| Error::Database(format!("failed to create migration log: {e}")))?;
        Ok(())
    }

    fn read_applied(&self) -> Result<Vec<LogEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT version, name, applied_at FROM {}",
                self.log_table
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to query migration log: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let (version, name, applied_at) =
                row.map_err(|e| Error::Database(format!("failed to read log row: {e}")))?;
            let version: Version = version
                .parse()
                .map_err(|e| Error::Database(format!("corrupt log entry {version:?}: {e}")))?;
            let applied_at = parse_datetime(&applied_at).unwrap_or_else(|| {
                warn!("log entry {version} has unparseable applied_at {applied_at:?}");
                DateTime::<Utc>::UNIX_EPOCH
            });
            entries.push(LogEntry {
                version,
                name,
                applied_at,
            });
        }
        entries.sort_by_key(|e| e.version);
        Ok(entries)
    }

    fn append(&self, entry: &LogEntry) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (version, name, applied_at) VALUES (?1, ?2, ?3)",
                self.log_table
            ),
            params![
                entry.version.to_string(),
                entry.name,
                entry.applied_at.to_rfc3339()
            ],
        )
        .map_err(|e| Error::Database(format!("failed to record step {}: {e}", entry.version)))?;
        Ok(())
    }

    fn remove(&self, version: Version) -> Result<bool> {
        let conn = self.connection()?;
        let removed = conn
            .execute(
                &format!("DELETE FROM {} WHERE version = ?1", self.log_table),
                params![version.to_string()],
            )
            .map_err(|e| Error::Database(format!("failed to remove step {version}: {e}")))?;
        Ok(removed > 0)
    }

    fn acquire_lock(&self, owner: &str) -> Result<()> {
        let conn = self.connection()?;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (id, owner, acquired_at) VALUES (1, ?1, ?2)",
                    self.lock_table
                ),
                params![owner, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to acquire migration lock: {e}")))?;
        if inserted > 0 {
            return Ok(());
        }

        let (holder, acquired_at): (String, String) = conn
            .query_row(
                &format!("SELECT owner, acquired_at FROM {} WHERE id = 1", self.lock_table),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| Error::Database(format!("failed to read migration lock: {e}")))?;
        if holder == owner {
            debug!("migration lock already held by {owner}");
            return Ok(());
        }
        Err(Error::ConcurrentRun {
            owner: holder,
            acquired_at,
        })
    }

    fn release_lock(&self, owner: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = 1 AND owner = ?1", self.lock_table),
            params![owner],
        )
        .map_err(|e| Error::Database(format!("failed to release migration lock: {e}")))?;
        Ok(())
    }

    fn force_release_lock(&self) -> Result<bool> {
        let conn = self.connection()?;
        let removed = conn
            .execute(&format!("DELETE FROM {} WHERE id = 1", self.lock_table), [])
            .map_err(|e| Error::Database(format!("failed to clear migration lock: {e}")))?;
        Ok(removed > 0)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Rows written by hand with datetime('now') use "YYYY-MM-DD HH:MM:SS".
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
