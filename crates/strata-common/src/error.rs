use thiserror::Error;

use crate::types::Version;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("security error: {0}")]
    Security(String),

    #[error("guard evaluation failed in step {version} ({name}): {source}")]
    GuardEvaluation {
        version: Version,
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("step {version} ({name}) failed: {source}")]
    Execution {
        version: Version,
        name: String,
        #[source]
        source: ExecutionError,
    },

    #[error("step {version} ({name}) is not reversible")]
    ReversalUnsupported { version: Version, name: String },

    #[error("another migration run holds the lock (owner {owner}, acquired {acquired_at})")]
    ConcurrentRun { owner: String, acquired_at: String },

    #[error("invalid runner state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A statement the target database rejected, kept verbatim for the operator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{statement}`: {message}")]
pub struct ExecutionError {
    pub statement: String,
    pub message: String,
}

impl ExecutionError {
    pub fn new(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ExecutionError};
    use crate::types::Version;

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("bad yaml".into());
        assert_eq!(e.to_string(), "configuration error: bad yaml");

        let e = Error::Catalog("duplicate version 1".into());
        assert_eq!(e.to_string(), "catalog error: duplicate version 1");

        let e = Error::ReversalUnsupported {
            version: Version::new(20230821175749),
            name: "drop_project_memberships".into(),
        };
        assert_eq!(
            e.to_string(),
            "step 20230821175749 (drop_project_memberships) is not reversible"
        );
    }

    #[test]
    fn execution_failure_keeps_statement_verbatim() {
        let e = Error::Execution {
            version: Version::new(3),
            name: "add_flags".into(),
            source: ExecutionError::new(
                "ALTER TABLE \"posts\" ADD COLUMN \"flag\" BOOLEAN",
                "duplicate column name: flag",
            ),
        };
        assert_eq!(
            e.to_string(),
            "step 3 (add_flags) failed: `ALTER TABLE \"posts\" ADD COLUMN \"flag\" BOOLEAN`: \
             duplicate column name: flag"
        );
    }

    #[test]
    fn guard_failure_keeps_its_cause() {
        let e = Error::GuardEvaluation {
            version: Version::new(3),
            name: "drop_memberships".into(),
            source: Box::new(Error::Database("database is locked".into())),
        };
        assert_eq!(
            e.to_string(),
            "guard evaluation failed in step 3 (drop_memberships): database error: database is locked"
        );
        let cause = std::error::Error::source(&e).unwrap();
        assert_eq!(cause.to_string(), "database error: database is locked");
    }
}
