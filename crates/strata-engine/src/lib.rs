pub mod catalog;
pub mod database;
pub mod ddl;
pub mod executor;
pub mod guard;
pub mod log;
pub mod operation;
pub mod runner;
pub mod step;

#[cfg(test)]
mod fake;

pub use catalog::Catalog;
pub use database::{ColumnInfo, Database, ForeignKeyInfo, IndexInfo, TableInfo};
pub use executor::StatementExecutor;
pub use guard::{Guard, GuardEvaluator, GuardTarget, ObjectKind};
pub use log::{LogEntry, LogLock, LogStore, MigrationLog};
pub use operation::{Action, ColumnDef, ColumnDefault, ColumnType, Direction, IndexSpec, Operation};
pub use runner::{
    AppliedStep, MigrationRunner, RunReport, RunnerOptions, RunnerState, StatusReport, StepStatus,
};
pub use step::{Step, StepOutcome};
