//! The elementary, guarded changes a step is made of.

use serde::{Deserialize, Serialize};

use crate::database::IndexInfo;
use crate::guard::{Guard, GuardTarget, ObjectKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn is_up(self) -> bool {
        matches!(self, Direction::Up)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    String,
    Integer,
    BigInteger,
    Boolean,
    Float,
    Decimal,
    Date,
    Datetime,
    Timestamp,
    Binary,
    Json,
    /// Verbatim type name for anything not listed above.
    Custom(String),
}

impl ColumnType {
    pub fn sql(&self) -> &str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::String => "VARCHAR(255)",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInteger => "BIGINT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Float => "REAL",
            ColumnType::Decimal => "DECIMAL",
            ColumnType::Date => "DATE",
            ColumnType::Datetime => "DATETIME",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Binary => "BLOB",
            ColumnType::Json => "JSON",
            ColumnType::Custom(name) => name,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// SQL expression used verbatim as the column default.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    None,
    Expr(String),
}

impl ColumnDefault {
    pub fn as_expr(&self) -> Option<&str> {
        match self {
            ColumnDefault::None => None,
            ColumnDefault::Expr(expr) => Some(expr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub columns: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            name: None,
            unique: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Explicit name, or `index_<table>_on_<a>_and_<b>`.
    pub fn resolved_name(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("index_{table}_on_{}", self.columns.join("_and_")),
        }
    }

    /// A named spec matches by name; an unnamed one by exact column list.
    pub fn matches(&self, index: &IndexInfo) -> bool {
        match &self.name {
            Some(name) => index.name.eq_ignore_ascii_case(name),
            None => {
                index.columns.len() == self.columns.len()
                    && index
                        .columns
                        .iter()
                        .zip(&self.columns)
                        .all(|(a, b)| a.eq_ignore_ascii_case(b))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: String,
        /// Needed to re-add the column when reversing.
        #[serde(default)]
        definition: Option<ColumnDef>,
    },
    ChangeColumnDefault {
        table: String,
        column: String,
        to: ColumnDefault,
        #[serde(default)]
        from: Option<ColumnDefault>,
    },
    ChangeColumnNullability {
        table: String,
        column: String,
        nullable: bool,
        /// Value written into NULL rows before NOT NULL is enforced.
        #[serde(default)]
        fill: Option<String>,
    },
    AddIndex {
        table: String,
        index: IndexSpec,
    },
    DropIndex {
        table: String,
        index: IndexSpec,
    },
    DropTable {
        table: String,
        #[serde(default)]
        columns: Option<Vec<ColumnDef>>,
    },
    ExecuteRawStatement {
        #[serde(default)]
        up: Option<String>,
        #[serde(default)]
        down: Option<String>,
        /// Scope for guards; raw statements name no object of their own.
        #[serde(default)]
        table: Option<String>,
        #[serde(default)]
        column: Option<String>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::CreateTable { .. } => "create_table",
            Action::AddColumn { .. } => "add_column",
            Action::DropColumn { .. } => "drop_column",
            Action::ChangeColumnDefault { .. } => "change_column_default",
            Action::ChangeColumnNullability { .. } => "change_column_nullability",
            Action::AddIndex { .. } => "add_index",
            Action::DropIndex { .. } => "drop_index",
            Action::DropTable { .. } => "drop_table",
            Action::ExecuteRawStatement { .. } => "execute_raw_statement",
        }
    }

    /// The object a guard on this action is evaluated against.
    pub fn target(&self) -> GuardTarget<'_> {
        match self {
            Action::CreateTable { table, .. } | Action::DropTable { table, .. } => {
                GuardTarget::table(table)
            }
            Action::AddColumn { table, column } => GuardTarget::column(table, &column.name),
            Action::DropColumn { table, column, .. }
            | Action::ChangeColumnDefault { table, column, .. }
            | Action::ChangeColumnNullability { table, column, .. } => {
                GuardTarget::column(table, column)
            }
            Action::AddIndex { table, index } | Action::DropIndex { table, index } => {
                GuardTarget::index(table, index)
            }
            Action::ExecuteRawStatement { table, column, .. } => GuardTarget {
                table: table.as_deref(),
                column: column.as_deref(),
                index: None,
            },
        }
    }

    /// Kind of object this action brings into or out of existence.
    pub fn manages(&self) -> Option<ObjectKind> {
        match self {
            Action::CreateTable { .. } | Action::DropTable { .. } => Some(ObjectKind::Table),
            Action::AddColumn { .. } | Action::DropColumn { .. } => Some(ObjectKind::Column),
            Action::AddIndex { .. } | Action::DropIndex { .. } => Some(ObjectKind::Index),
            Action::ChangeColumnDefault { .. }
            | Action::ChangeColumnNullability { .. }
            | Action::ExecuteRawStatement { .. } => None,
        }
    }

    /// Whether the `down` direction can be rendered.
    pub fn is_invertible(&self) -> bool {
        match self {
            Action::DropColumn { definition, .. } => definition.is_some(),
            Action::ChangeColumnDefault { from, .. } => from.is_some(),
            Action::DropTable { columns, .. } => columns.is_some(),
            _ => true,
        }
    }

    /// Every identifier this action splices into generated SQL.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names = Vec::new();
        match self {
            Action::CreateTable { table, columns } => {
                names.push(table.as_str());
                names.extend(columns.iter().map(|c| c.name.as_str()));
            }
            Action::AddColumn { table, column } => {
                names.push(table.as_str());
                names.push(column.name.as_str());
            }
            Action::DropColumn {
                table,
                column,
                definition,
            } => {
                names.push(table.as_str());
                names.push(column.as_str());
                if let Some(def) = definition {
                    names.push(def.name.as_str());
                }
            }
            Action::ChangeColumnDefault { table, column, .. }
            | Action::ChangeColumnNullability { table, column, .. } => {
                names.push(table.as_str());
                names.push(column.as_str());
            }
            Action::AddIndex { table, index } | Action::DropIndex { table, index } => {
                names.push(table.as_str());
                names.extend(index.columns.iter().map(String::as_str));
                if let Some(name) = &index.name {
                    names.push(name.as_str());
                }
            }
            Action::DropTable { table, columns } => {
                names.push(table.as_str());
                if let Some(columns) = columns {
                    names.extend(columns.iter().map(|c| c.name.as_str()));
                }
            }
            Action::ExecuteRawStatement { table, column, .. } => {
                names.extend(table.as_deref());
                names.extend(column.as_deref());
            }
        }
        names
    }
}

/// An action plus the precondition deciding whether it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub guard: Guard,
    pub action: Action,
}

impl Operation {
    pub fn new(action: Action) -> Self {
        Self {
            guard: Guard::None,
            action,
        }
    }

    pub fn guarded(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    /// Guard used when running `down`: inverted when it checks the very
    /// object this action creates or destroys, unchanged otherwise.
    pub fn reverse_guard(&self) -> Guard {
        match (self.guard.object_kind(), self.action.manages()) {
            (Some(checked), Some(managed)) if checked == managed => self.guard.inverted(),
            _ => self.guard,
        }
    }

    pub fn create_table(table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self::new(Action::CreateTable {
            table: table.into(),
            columns,
        })
    }

    pub fn add_column(table: impl Into<String>, column: ColumnDef) -> Self {
        Self::new(Action::AddColumn {
            table: table.into(),
            column,
        })
    }

    pub fn drop_column(
        table: impl Into<String>,
        column: impl Into<String>,
        definition: Option<ColumnDef>,
    ) -> Self {
        Self::new(Action::DropColumn {
            table: table.into(),
            column: column.into(),
            definition,
        })
    }

    pub fn change_column_default(
        table: impl Into<String>,
        column: impl Into<String>,
        to: ColumnDefault,
        from: Option<ColumnDefault>,
    ) -> Self {
        Self::new(Action::ChangeColumnDefault {
            table: table.into(),
            column: column.into(),
            to,
            from,
        })
    }

    pub fn change_column_null(
        table: impl Into<String>,
        column: impl Into<String>,
        nullable: bool,
    ) -> Self {
        Self::new(Action::ChangeColumnNullability {
            table: table.into(),
            column: column.into(),
            nullable,
            fill: None,
        })
    }

    pub fn add_index(table: impl Into<String>, index: IndexSpec) -> Self {
        Self::new(Action::AddIndex {
            table: table.into(),
            index,
        })
    }

    pub fn drop_index(table: impl Into<String>, index: IndexSpec) -> Self {
        Self::new(Action::DropIndex {
            table: table.into(),
            index,
        })
    }

    pub fn drop_table(table: impl Into<String>, columns: Option<Vec<ColumnDef>>) -> Self {
        Self::new(Action::DropTable {
            table: table.into(),
            columns,
        })
    }

    /// Raw statement with no `down` counterpart.
    pub fn execute(up: impl Into<String>) -> Self {
        Self::new(Action::ExecuteRawStatement {
            up: Some(up.into()),
            down: None,
            table: None,
            column: None,
        })
    }

    pub fn execute_reversible(up: impl Into<String>, down: impl Into<String>) -> Self {
        Self::new(Action::ExecuteRawStatement {
            up: Some(up.into()),
            down: Some(down.into()),
            table: None,
            column: None,
        })
    }
}
