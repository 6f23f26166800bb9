//! Renders actions into SQLite statements and runs them.
//!
//! SQLite cannot alter a column in place, so default and nullability changes
//! go through a table rebuild: create a copy with the new column shape, move
//! the rows, swap the tables and recreate the explicit indexes and triggers.

use strata_common::ExecutionError;
use strata_security::IdentifierValidator;
use tracing::debug;

use crate::database::{ColumnInfo, Database, TableInfo};
use crate::ddl::{self, ColumnChange};
use crate::operation::{Action, ColumnDef, Direction, IndexSpec};

const REBUILD_PREFIX: &str = "_strata_rebuild_";

fn quote(name: &str) -> String {
    IdentifierValidator::quote_identifier(name)
}

pub struct StatementExecutor<'a> {
    database: &'a dyn Database,
}

impl<'a> StatementExecutor<'a> {
    pub fn new(database: &'a dyn Database) -> Self {
        Self { database }
    }

    /// Render and run `action` in `direction`. Returns the number of
    /// statements executed.
    pub fn execute(&self, action: &Action, direction: Direction) -> Result<usize, ExecutionError> {
        let statements = self.render(action, direction)?;
        for sql in &statements {
            debug!("executing: {sql}");
            self.database.execute_statement(sql)?;
        }
        Ok(statements.len())
    }

    /// Statements for `action` in `direction`, reading live metadata where the
    /// rendering depends on it.
    pub fn render(&self, action: &Action, direction: Direction) -> Result<Vec<String>, ExecutionError> {
        match (action, direction) {
            (Action::CreateTable { table, columns }, Direction::Up) => {
                Ok(vec![create_table_sql(table, columns)])
            }
            (Action::CreateTable { table, .. }, Direction::Down) => {
                Ok(vec![format!("DROP TABLE {}", quote(table))])
            }

            (Action::AddColumn { table, column }, Direction::Up) => {
                Ok(vec![add_column_sql(table, column)])
            }
            (Action::AddColumn { table, column }, Direction::Down) => {
                Ok(vec![drop_column_sql(table, &column.name)])
            }

            (Action::DropColumn { table, column, .. }, Direction::Up) => {
                Ok(vec![drop_column_sql(table, column)])
            }
            (Action::DropColumn { table, definition, .. }, Direction::Down) => match definition {
                Some(def) => Ok(vec![add_column_sql(table, def)]),
                None => Err(irreversible(action)),
            },

            (Action::ChangeColumnDefault { table, column, to, from }, _) => {
                let target = if direction.is_up() {
                    to
                } else {
                    from.as_ref().ok_or_else(|| irreversible(action))?
                };
                let info = self.require_table(table)?;
                let default = target.as_expr().map(str::to_string);
                rebuild_table(&info, column, &ColumnChange::Default(default))
            }

            (
                Action::ChangeColumnNullability {
                    table,
                    column,
                    nullable,
                    fill,
                },
                _,
            ) => {
                let nullable = if direction.is_up() { *nullable } else { !*nullable };
                let info = self.require_table(table)?;
                let mut statements = Vec::new();
                if let (false, Some(fill)) = (nullable, fill) {
                    statements.push(format!(
                        "UPDATE {} SET {col} = {fill} WHERE {col} IS NULL",
                        quote(table),
                        col = quote(column),
                    ));
                }
                statements.extend(rebuild_table(&info, column, &ColumnChange::NotNull(!nullable))?);
                Ok(statements)
            }

            (Action::AddIndex { table, index }, Direction::Up) => {
                Ok(vec![create_index_sql(table, index)])
            }
            (Action::AddIndex { table, index }, Direction::Down) => {
                Ok(vec![format!("DROP INDEX {}", quote(&index.resolved_name(table)))])
            }

            (Action::DropIndex { table, index }, Direction::Up) => {
                let name = self.resolve_index_name(table, index)?;
                Ok(vec![format!("DROP INDEX {}", quote(&name))])
            }
            (Action::DropIndex { table, index }, Direction::Down) => {
                Ok(vec![create_index_sql(table, index)])
            }

            (Action::DropTable { table, .. }, Direction::Up) => {
                Ok(vec![format!("DROP TABLE {}", quote(table))])
            }
            (Action::DropTable { table, columns }, Direction::Down) => match columns {
                Some(columns) => Ok(vec![create_table_sql(table, columns)]),
                None => Err(irreversible(action)),
            },

            (Action::ExecuteRawStatement { up, down, .. }, _) => {
                let text = if direction.is_up() { up } else { down };
                Ok(text
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect())
            }
        }
    }

    fn require_table(&self, table: &str) -> Result<TableInfo, ExecutionError> {
        let describe = format!("describe table {}", quote(table));
        match self.database.describe_table(table) {
            Ok(Some(info)) => Ok(info),
            Ok(None) => Err(ExecutionError::new(describe, format!("no such table: {table}"))),
            Err(e) => Err(ExecutionError::new(describe, e.to_string())),
        }
    }

    /// Name of the live index an unnamed spec refers to, falling back to the
    /// conventional name when nothing matches.
    fn resolve_index_name(&self, table: &str, index: &IndexSpec) -> Result<String, ExecutionError> {
        if index.name.is_some() {
            return Ok(index.resolved_name(table));
        }
        let info = self.require_table(table)?;
        Ok(info
            .index_on(&index.columns)
            .map(|i| i.name.clone())
            .unwrap_or_else(|| index.resolved_name(table)))
    }
}

fn irreversible(action: &Action) -> ExecutionError {
    ExecutionError::new(
        format!("{} (down)", action.kind()),
        "operation does not record enough information to be reversed",
    )
}

fn column_def_sql(column: &ColumnDef) -> String {
    let mut sql = format!("{} {}", quote(&column.name), column.column_type.sql());
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
    } else if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(&format!(" DEFAULT ({default})"));
    }
    sql
}

fn create_table_sql(table: &str, columns: &[ColumnDef]) -> String {
    let columns: Vec<String> = columns.iter().map(column_def_sql).collect();
    format!("CREATE TABLE {} ({})", quote(table), columns.join(", "))
}

fn add_column_sql(table: &str, column: &ColumnDef) -> String {
    format!("ALTER TABLE {} ADD COLUMN {}", quote(table), column_def_sql(column))
}

fn drop_column_sql(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} DROP COLUMN {}", quote(table), quote(column))
}

fn create_index_sql(table: &str, index: &IndexSpec) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.resolved_name(table)),
        quote(table),
        IdentifierValidator::quote_list(&index.columns),
    )
}

fn live_column_sql(column: &ColumnInfo, inline_primary_key: bool) -> String {
    let mut sql = quote(&column.name);
    if !column.sql_type.is_empty() {
        sql.push(' ');
        sql.push_str(&column.sql_type);
    }
    if inline_primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if column.not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(&format!(" DEFAULT ({default})"));
    }
    sql
}

/// Scratch table definition rewritten from the stored `CREATE TABLE` text.
/// Returns `None` when the text is missing or the column cannot be found in it.
fn create_from_stored_sql(
    info: &TableInfo,
    scratch: &str,
    column: &str,
    change: &ColumnChange,
) -> Option<String> {
    let stored = ddl::split_create_table(info.sql.as_deref()?)?;
    let mut found = false;
    let definitions: Vec<String> = stored
        .definitions
        .iter()
        .map(|def| match ddl::column_name(def) {
            Some(name) if name.eq_ignore_ascii_case(column) => {
                found = true;
                ddl::rewrite_column(def, change)
            }
            _ => def.to_string(),
        })
        .collect();
    found.then(|| ddl::create_table(&quote(scratch), &definitions, stored.suffix))
}

/// Scratch table definition assembled from column metadata alone.
fn create_from_metadata(info: &TableInfo, scratch: &str, column: &str, change: &ColumnChange) -> String {
    let mut columns = info.columns.clone();
    if let Some(target) = columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(column)) {
        match change {
            ColumnChange::Default(default) => target.default = default.clone(),
            ColumnChange::NotNull(not_null) => target.not_null = *not_null,
        }
    }

    let mut pk: Vec<&ColumnInfo> = columns.iter().filter(|c| c.primary_key > 0).collect();
    pk.sort_by_key(|c| c.primary_key);
    let inline_pk = pk.len() == 1;

    let mut definitions: Vec<String> = columns
        .iter()
        .map(|c| live_column_sql(c, inline_pk && c.primary_key > 0))
        .collect();
    if pk.len() > 1 {
        let names: Vec<&str> = pk.iter().map(|c| c.name.as_str()).collect();
        definitions.push(format!(
            "PRIMARY KEY ({})",
            IdentifierValidator::quote_list(&names)
        ));
    }
    for fk in &info.foreign_keys {
        let mut clause = format!(
            "FOREIGN KEY ({}) REFERENCES {}",
            IdentifierValidator::quote_list(&fk.columns),
            quote(&fk.references_table),
        );
        // Empty means the parent's primary key.
        if !fk.references_columns.is_empty() {
            clause.push_str(&format!(
                " ({})",
                IdentifierValidator::quote_list(&fk.references_columns)
            ));
        }
        if fk.on_update != "NO ACTION" && !fk.on_update.is_empty() {
            clause.push_str(&format!(" ON UPDATE {}", fk.on_update));
        }
        if fk.on_delete != "NO ACTION" && !fk.on_delete.is_empty() {
            clause.push_str(&format!(" ON DELETE {}", fk.on_delete));
        }
        definitions.push(clause);
    }
    ddl::create_table(&quote(scratch), &definitions, "")
}

/// Statements recreating `info` with `column` modified by `change`.
///
/// The scratch table is dropped first so a run interrupted outside a
/// transaction can be repeated. The rename runs with `legacy_alter_table`
/// so views naming the table are not re-validated mid-swap; the table's
/// indexes and triggers are recreated from their stored text afterwards.
fn rebuild_table(
    info: &TableInfo,
    column: &str,
    change: &ColumnChange,
) -> Result<Vec<String>, ExecutionError> {
    if info.column(column).is_none() {
        return Err(ExecutionError::new(
            format!("describe table {}", quote(&info.name)),
            format!("no such column: {}.{column}", info.name),
        ));
    }

    let scratch = format!("{REBUILD_PREFIX}{}", info.name);
    let create = create_from_stored_sql(info, &scratch, column, change)
        .unwrap_or_else(|| create_from_metadata(info, &scratch, column, change));
    let names: Vec<&str> = info.columns.iter().map(|c| c.name.as_str()).collect();
    let column_list = IdentifierValidator::quote_list(&names);

    let mut statements = vec![
        format!("DROP TABLE IF EXISTS {}", quote(&scratch)),
        create,
        format!(
            "INSERT INTO {} ({column_list}) SELECT {column_list} FROM {}",
            quote(&scratch),
            quote(&info.name),
        ),
        format!("DROP TABLE {}", quote(&info.name)),
        "PRAGMA legacy_alter_table = ON".to_string(),
        format!("ALTER TABLE {} RENAME TO {}", quote(&scratch), quote(&info.name)),
        "PRAGMA legacy_alter_table = OFF".to_string(),
    ];
    statements.extend(info.indexes.iter().filter_map(|i| i.sql.clone()));
    statements.extend(info.triggers.iter().cloned());
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ForeignKeyInfo, IndexInfo};
    use crate::fake::FakeDatabase;
    use crate::operation::{ColumnDefault, ColumnType, Operation};

    fn render(db: &FakeDatabase, op: &Operation, direction: Direction) -> Vec<String> {
        StatementExecutor::new(db).render(&op.action, direction).unwrap()
    }

    #[test]
    fn add_column_renders_and_reverses() {
        let db = FakeDatabase::new();
        let op = Operation::add_column(
            "posts",
            ColumnDef::new("previous_description", ColumnType::Text),
        );
        assert_eq!(
            render(&db, &op, Direction::Up),
            vec!["ALTER TABLE \"posts\" ADD COLUMN \"previous_description\" TEXT"]
        );
        assert_eq!(
            render(&db, &op, Direction::Down),
            vec!["ALTER TABLE \"posts\" DROP COLUMN \"previous_description\""]
        );
    }

    #[test]
    fn column_definitions_carry_constraints() {
        let db = FakeDatabase::new();
        let op = Operation::create_table(
            "project_memberships",
            vec![
                ColumnDef::new("id", ColumnType::Integer).primary_key(),
                ColumnDef::new("remindable", ColumnType::Boolean)
                    .not_null()
                    .default_expr("TRUE"),
            ],
        );
        assert_eq!(
            render(&db, &op, Direction::Up),
            vec![
                "CREATE TABLE \"project_memberships\" (\"id\" INTEGER PRIMARY KEY, \
                 \"remindable\" BOOLEAN NOT NULL DEFAULT (TRUE))"
            ]
        );
    }

    #[test]
    fn index_operations_use_conventional_names() {
        let db = FakeDatabase::new();
        let op = Operation::add_index(
            "project_memberships",
            IndexSpec::new(["remindable", "member_id"]).unique(),
        );
        assert_eq!(
            render(&db, &op, Direction::Up),
            vec![
                "CREATE UNIQUE INDEX \"index_project_memberships_on_remindable_and_member_id\" \
                 ON \"project_memberships\" (\"remindable\", \"member_id\")"
            ]
        );
    }

    #[test]
    fn drop_index_resolves_live_name_by_columns() {
        let db = FakeDatabase::new();
        db.add_table("project_memberships", &["remindable", "member_id"]);
        db.add_index("project_memberships", "pm_remind_member", &["remindable", "member_id"]);

        let op = Operation::drop_index(
            "project_memberships",
            IndexSpec::new(["remindable", "member_id"]),
        );
        assert_eq!(
            render(&db, &op, Direction::Up),
            vec!["DROP INDEX \"pm_remind_member\""]
        );
    }

    #[test]
    fn default_change_rebuilds_table_and_keeps_indexes() {
        let db = FakeDatabase::new();
        db.put_table(TableInfo {
            name: "project_memberships".into(),
            columns: vec![
                ColumnInfo {
                    name: "id".into(),
                    sql_type: "INTEGER".into(),
                    not_null: false,
                    default: None,
                    primary_key: 1,
                },
                ColumnInfo {
                    name: "member_id".into(),
                    sql_type: "INTEGER".into(),
                    not_null: true,
                    default: None,
                    primary_key: 0,
                },
                ColumnInfo {
                    name: "remindable".into(),
                    sql_type: "BOOLEAN".into(),
                    not_null: false,
                    default: Some("FALSE".into()),
                    primary_key: 0,
                },
            ],
            indexes: vec![IndexInfo {
                name: "index_project_memberships_on_remindable".into(),
                columns: vec!["remindable".into()],
                unique: false,
                sql: Some(
                    "CREATE INDEX index_project_memberships_on_remindable ON project_memberships (remindable)"
                        .into(),
                ),
            }],
            foreign_keys: vec![ForeignKeyInfo {
                columns: vec!["member_id".into()],
                references_table: "users".into(),
                references_columns: vec!["id".into()],
                on_update: "NO ACTION".into(),
                on_delete: "CASCADE".into(),
            }],
            sql: None,
            triggers: Vec::new(),
        });

        let op = Operation::change_column_default(
            "project_memberships",
            "remindable",
            ColumnDefault::Expr("TRUE".into()),
            Some(ColumnDefault::Expr("FALSE".into())),
        );
        let up = render(&db, &op, Direction::Up);
        assert_eq!(up.len(), 8);
        assert_eq!(up[0], "DROP TABLE IF EXISTS \"_strata_rebuild_project_memberships\"");
        assert_eq!(
            up[1],
            "CREATE TABLE \"_strata_rebuild_project_memberships\" (\"id\" INTEGER PRIMARY KEY, \
             \"member_id\" INTEGER NOT NULL, \"remindable\" BOOLEAN DEFAULT (TRUE), \
             FOREIGN KEY (\"member_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE)"
        );
        assert_eq!(
            up[2],
            "INSERT INTO \"_strata_rebuild_project_memberships\" (\"id\", \"member_id\", \"remindable\") \
             SELECT \"id\", \"member_id\", \"remindable\" FROM \"project_memberships\""
        );
        assert_eq!(up[3], "DROP TABLE \"project_memberships\"");
        assert_eq!(up[4], "PRAGMA legacy_alter_table = ON");
        assert_eq!(
            up[5],
            "ALTER TABLE \"_strata_rebuild_project_memberships\" RENAME TO \"project_memberships\""
        );
        assert_eq!(up[6], "PRAGMA legacy_alter_table = OFF");
        assert!(up[7].starts_with("CREATE INDEX index_project_memberships_on_remindable"));

        let down = render(&db, &op, Direction::Down);
        assert!(down[1].contains("\"remindable\" BOOLEAN DEFAULT (FALSE)"));
    }

    #[test]
    fn nullability_direction_decides_constraint() {
        let db = FakeDatabase::new();
        db.add_table("posts", &["id", "user_id"]);

        let relax = Operation::change_column_null("posts", "user_id", true);
        let up = render(&db, &relax, Direction::Up);
        assert!(up[1].contains("\"user_id\" INTEGER,") || up[1].contains("\"user_id\" INTEGER)"));
        assert!(!up[1].contains("\"user_id\" INTEGER NOT NULL"));

        let down = render(&db, &relax, Direction::Down);
        assert!(down[1].contains("\"user_id\" INTEGER NOT NULL"));

        let mut enforce = Operation::change_column_null("posts", "user_id", false);
        if let Action::ChangeColumnNullability { fill, .. } = &mut enforce.action {
            *fill = Some("0".into());
        }
        let up = render(&db, &enforce, Direction::Up);
        assert_eq!(
            up[0],
            "UPDATE \"posts\" SET \"user_id\" = 0 WHERE \"user_id\" IS NULL"
        );
        assert!(up[2].contains("\"user_id\" INTEGER NOT NULL"));
    }

    #[test]
    fn stored_table_sql_keeps_constraints_and_triggers() {
        let db = FakeDatabase::new();
        db.add_table("accounts", &["id", "email", "balance"]);
        let mut info = db.describe_table("accounts").unwrap().unwrap();
        info.sql = Some(
            "CREATE TABLE accounts (\n  id INTEGER PRIMARY KEY AUTOINCREMENT,\n  \
             email TEXT NOT NULL UNIQUE COLLATE NOCASE,\n  \
             balance INTEGER DEFAULT 0 CHECK (balance >= 0)\n)"
                .into(),
        );
        info.triggers = vec![
            "CREATE TRIGGER accounts_touch AFTER UPDATE ON accounts BEGIN SELECT 1; END".into(),
        ];
        db.put_table(info);

        let op = Operation::change_column_default(
            "accounts",
            "balance",
            ColumnDefault::Expr("100".into()),
            Some(ColumnDefault::Expr("0".into())),
        );
        let up = render(&db, &op, Direction::Up);
        assert_eq!(
            up[1],
            "CREATE TABLE \"_strata_rebuild_accounts\" (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             email TEXT NOT NULL UNIQUE COLLATE NOCASE, \
             balance INTEGER CHECK (balance >= 0) DEFAULT (100))"
        );
        assert_eq!(
            up.last().map(String::as_str),
            Some("CREATE TRIGGER accounts_touch AFTER UPDATE ON accounts BEGIN SELECT 1; END")
        );

        let relax = Operation::change_column_null("accounts", "email", true);
        let up = render(&db, &relax, Direction::Up);
        assert!(up[1].contains("email TEXT UNIQUE COLLATE NOCASE,"));
    }

    #[test]
    fn missing_table_or_column_is_execution_error() {
        let db = FakeDatabase::new();
        let executor = StatementExecutor::new(&db);
        let op = Operation::change_column_null("posts", "user_id", true);
        let err = executor.execute(&op.action, Direction::Up).unwrap_err();
        assert_eq!(err.message, "no such table: posts");

        db.add_table("posts", &["id"]);
        let err = executor.execute(&op.action, Direction::Up).unwrap_err();
        assert_eq!(err.message, "no such column: posts.user_id");
    }

    #[test]
    fn irreversible_down_is_refused() {
        let db = FakeDatabase::new();
        let executor = StatementExecutor::new(&db);
        let op = Operation::drop_table("project_memberships", None);
        let err = executor.execute(&op.action, Direction::Down).unwrap_err();
        assert_eq!(err.statement, "drop_table (down)");
        assert!(db.executed().is_empty());
    }

    #[test]
    fn raw_statement_picks_text_by_direction() {
        let db = FakeDatabase::new();
        let executor = StatementExecutor::new(&db);
        let op = Operation::execute(
            "UPDATE posts SET previous_description = description WHERE previous_description IS NULL",
        );
        assert_eq!(executor.execute(&op.action, Direction::Up).unwrap(), 1);
        assert_eq!(executor.execute(&op.action, Direction::Down).unwrap(), 0);
        assert_eq!(db.executed().len(), 1);
    }

    #[test]
    fn failures_carry_the_statement() {
        let db = FakeDatabase::new();
        db.fail_on("DROP TABLE", "no such table: project_memberships");
        let executor = StatementExecutor::new(&db);
        let op = Operation::drop_table("project_memberships", None);
        let err = executor.execute(&op.action, Direction::Up).unwrap_err();
        assert_eq!(err.statement, "DROP TABLE \"project_memberships\"");
        assert_eq!(err.message, "no such table: project_memberships");
    }
}
