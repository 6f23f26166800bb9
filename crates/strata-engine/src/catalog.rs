//! The ordered, validated set of steps a runner works from.
//!
//! Catalogs are usually loaded from a directory holding one file per step,
//! named `<version>_<name>.yml` (or `.yaml` / `.toml`):
//!
//! ```yaml
//! reversible: false
//! operations:
//!   - guard: table_exists
//!     action:
//!       type: drop_table
//!       table: project_memberships
//! ```

use std::path::Path;

use serde::Deserialize;
use strata_common::{Error, Result, Version};
use strata_security::IdentifierValidator;
use tracing::{debug, info};

use crate::operation::{Action, Operation};
use crate::step::Step;

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    steps: Vec<Step>,
}

fn default_true() -> bool {
    true
}

/// Body of a step file; version and name come from the file name.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepFile {
    #[serde(default)]
    reversible: bool,
    #[serde(default = "default_true")]
    transactional: bool,
    #[serde(default)]
    operations: Vec<Operation>,
}

impl Catalog {
    /// Validate `steps` and order them by version.
    pub fn new(mut steps: Vec<Step>) -> Result<Self> {
        steps.sort_by_key(|s| s.version);
        for pair in steps.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(Error::Catalog(format!(
                    "duplicate version {} ({} and {})",
                    pair[0].version, pair[0].name, pair[1].name
                )));
            }
        }
        for step in &steps {
            validate_step(step)?;
        }
        Ok(Self { steps })
    }

    /// Load every step file in `dir`. Files with other extensions are ignored.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "catalog directory {}",
                dir.display()
            )));
        }

        let mut steps = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !matches!(ext, "yml" | "yaml" | "toml") {
                continue;
            }
            steps.push(load_step_file(&path, ext)?);
        }

        let catalog = Self::new(steps)?;
        info!(
            "loaded {} step(s) from {}",
            catalog.steps.len(),
            dir.display()
        );
        Ok(catalog)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, version: Version) -> Option<&Step> {
        self.steps
            .binary_search_by_key(&version, |s| s.version)
            .ok()
            .map(|i| &self.steps[i])
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn latest_version(&self) -> Option<Version> {
        self.steps.last().map(|s| s.version)
    }
}

/// Split `20230405203543_drop_project_memberships_remindable` into its parts.
fn parse_file_stem(stem: &str) -> Result<(Version, String)> {
    let (version, name) = stem.split_once('_').ok_or_else(|| {
        Error::Catalog(format!(
            "step file {stem:?} must be named <version>_<name>"
        ))
    })?;
    if name.is_empty() {
        return Err(Error::Catalog(format!("step file {stem:?} has an empty name")));
    }
    Ok((version.parse()?, name.to_string()))
}

fn load_step_file(path: &Path, ext: &str) -> Result<Step> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Catalog(format!("invalid step file name {}", path.display())))?;
    let (version, name) = parse_file_stem(stem)?;

    let contents = std::fs::read_to_string(path)?;
    let file: StepFile = match ext {
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Catalog(format!("{}: TOML parse error: {e}", path.display())))?,
        _ => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Catalog(format!("{}: YAML parse error: {e}", path.display())))?,
    };
    debug!("parsed step {version} ({name}) from {}", path.display());

    Ok(Step {
        version,
        name,
        operations: file.operations,
        reversible: file.reversible,
        transactional: file.transactional,
    })
}

fn validate_step(step: &Step) -> Result<()> {
    let context = |msg: String| Error::Catalog(format!("step {} ({}): {msg}", step.version, step.name));

    if step.name.trim().is_empty() {
        return Err(context("name cannot be empty".into()));
    }

    for (position, operation) in step.operations.iter().enumerate() {
        let action = &operation.action;
        let at = |msg: String| context(format!("operation {} ({}): {msg}", position + 1, action.kind()));

        for name in action.identifiers() {
            IdentifierValidator::validate_identifier(name).map_err(|e| at(e.to_string()))?;
        }
        if !operation.guard.fits(&action.target()) {
            return Err(at(format!(
                "guard {:?} does not apply to this operation",
                operation.guard
            )));
        }
        if step.reversible && !action.is_invertible() {
            return Err(at(
                "step is reversible but this operation cannot be reversed".into(),
            ));
        }

        match action {
            Action::CreateTable { columns, .. } if columns.is_empty() => {
                return Err(at("a table needs at least one column".into()));
            }
            Action::DropTable {
                columns: Some(columns),
                ..
            } if columns.is_empty() => {
                return Err(at("a table needs at least one column".into()));
            }
            Action::AddIndex { index, .. } | Action::DropIndex { index, .. }
                if index.columns.is_empty() =>
            {
                return Err(at("an index needs at least one column".into()));
            }
            Action::ExecuteRawStatement { up: None, down: None, .. } => {
                return Err(at("raw statement has no text for either direction".into()));
            }
            _ => {}
        }
    }

    Ok(())
}
