use std::sync::LazyLock;

use regex::Regex;
use strata_common::{Error, Result};

/// Longest identifier accepted.
const MAX_IDENTIFIER_LEN: usize = 63;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Validation and quoting for table, column and index names that end up
/// spliced into generated DDL.
pub struct IdentifierValidator;

impl IdentifierValidator {
    /// Check that `name` is a plain SQL identifier.
    pub fn validate_identifier(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Security("identifier cannot be empty".into()));
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::Security(format!(
                "identifier {name:?} exceeds {MAX_IDENTIFIER_LEN} characters"
            )));
        }
        if !IDENTIFIER.is_match(name) {
            return Err(Error::Security(format!(
                "identifier {name:?} may only contain letters, digits and underscores"
            )));
        }
        Ok(())
    }

    /// Double-quote an identifier, escaping embedded quotes.
    pub fn quote_identifier(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quote a list of identifiers and join them with `, `.
    pub fn quote_list<S: AsRef<str>>(names: &[S]) -> String {
        names
            .iter()
            .map(|n| Self::quote_identifier(n.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
