//! The capabilities the engine needs from its host database.

use strata_common::{ExecutionError, Result};

/// A live table as reported by the database's catalog metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    /// Stored `CREATE TABLE` text, when the database keeps it.
    pub sql: Option<String>,
    /// Stored `CREATE TRIGGER` text of triggers attached to the table.
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type as written in the schema; may be empty.
    pub sql_type: String,
    pub not_null: bool,
    /// Default expression text, if any.
    pub default: Option<String>,
    /// 1-based position within the primary key, 0 when not part of it.
    pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// Creation statement; `None` for indexes the database created implicitly.
    pub sql: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
    pub on_update: String,
    pub on_delete: String,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Index whose column list equals `columns`, in order.
    pub fn index_on(&self, columns: &[String]) -> Option<&IndexInfo> {
        self.indexes.iter().find(|i| {
            i.columns.len() == columns.len()
                && i
                    .columns
                    .iter()
                    .zip(columns)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
        })
    }
}

/// Target database: schema inspection, statement execution and transactions.
///
/// Implementations are expected to be blocking; the runner drives them serially.
pub trait Database {
    /// Describe `table`, or `None` when it does not exist.
    fn describe_table(&self, table: &str) -> Result<Option<TableInfo>>;

    /// Execute one statement, reporting failures with the statement text.
    fn execute_statement(&self, sql: &str) -> std::result::Result<(), ExecutionError>;

    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    /// Whether DDL participates in transactions and rolls back with them.
    fn supports_transactional_ddl(&self) -> bool;
}
