//! Existence predicates that let operations skip safely.

use serde::{Deserialize, Serialize};
use strata_common::{Error, Result};

use crate::database::Database;
use crate::operation::IndexSpec;

/// Precondition on an operation. A guard that evaluates false turns the
/// operation into a no-op success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    #[default]
    None,
    TableExists,
    ColumnExists,
    IndexExists,
    TableAbsent,
    ColumnAbsent,
    IndexAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Column,
    Index,
}

impl Guard {
    pub fn object_kind(self) -> Option<ObjectKind> {
        match self {
            Guard::None => None,
            Guard::TableExists | Guard::TableAbsent => Some(ObjectKind::Table),
            Guard::ColumnExists | Guard::ColumnAbsent => Some(ObjectKind::Column),
            Guard::IndexExists | Guard::IndexAbsent => Some(ObjectKind::Index),
        }
    }

    /// Swap `*Exists` and `*Absent`; `None` stays `None`.
    pub fn inverted(self) -> Self {
        match self {
            Guard::None => Guard::None,
            Guard::TableExists => Guard::TableAbsent,
            Guard::TableAbsent => Guard::TableExists,
            Guard::ColumnExists => Guard::ColumnAbsent,
            Guard::ColumnAbsent => Guard::ColumnExists,
            Guard::IndexExists => Guard::IndexAbsent,
            Guard::IndexAbsent => Guard::IndexExists,
        }
    }

    fn wants_absent(self) -> bool {
        matches!(
            self,
            Guard::TableAbsent | Guard::ColumnAbsent | Guard::IndexAbsent
        )
    }

    /// Whether `target` names the object this guard inspects.
    pub fn fits(self, target: &GuardTarget<'_>) -> bool {
        match self.object_kind() {
            None => true,
            Some(ObjectKind::Table) => target.table.is_some(),
            Some(ObjectKind::Column) => target.table.is_some() && target.column.is_some(),
            Some(ObjectKind::Index) => target.table.is_some() && target.index.is_some(),
        }
    }
}

/// The object a guard is evaluated against. Column and index lookups are
/// scoped to `table`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardTarget<'a> {
    pub table: Option<&'a str>,
    pub column: Option<&'a str>,
    pub index: Option<&'a IndexSpec>,
}

impl<'a> GuardTarget<'a> {
    pub fn table(table: &'a str) -> Self {
        Self {
            table: Some(table),
            ..Self::default()
        }
    }

    pub fn column(table: &'a str, column: &'a str) -> Self {
        Self {
            table: Some(table),
            column: Some(column),
            index: None,
        }
    }

    pub fn index(table: &'a str, index: &'a IndexSpec) -> Self {
        Self {
            table: Some(table),
            column: None,
            index: Some(index),
        }
    }
}

pub struct GuardEvaluator<'a> {
    database: &'a dyn Database,
}

impl<'a> GuardEvaluator<'a> {
    pub fn new(database: &'a dyn Database) -> Self {
        Self { database }
    }

    /// Evaluate `guard` against the live schema. Inspection failures are
    /// errors, never "guard false".
    pub fn evaluate(&self, guard: Guard, target: &GuardTarget<'_>) -> Result<bool> {
        let Some(kind) = guard.object_kind() else {
            return Ok(true);
        };
        if !guard.fits(target) {
            return Err(Error::Catalog(format!(
                "guard {guard:?} has no matching object on its operation"
            )));
        }

        let table = target.table.unwrap_or_default();
        let info = self.database.describe_table(table)?;
        let present = match (kind, info) {
            (_, None) => false,
            (ObjectKind::Table, Some(_)) => true,
            (ObjectKind::Column, Some(info)) => target
                .column
                .is_some_and(|column| info.column(column).is_some()),
            (ObjectKind::Index, Some(info)) => target
                .index
                .is_some_and(|spec| info.indexes.iter().any(|i| spec.matches(i))),
        };

        Ok(present != guard.wants_absent())
    }
}
