//! Drives a catalog against a database: pending diff, ordered application,
//! logging, and rollback of the most recent step.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use strata_common::{Error, Result, Version};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::database::Database;
use crate::executor::StatementExecutor;
use crate::guard::GuardEvaluator;
use crate::log::{LogEntry, LogStore, MigrationLog, pending_steps};
use crate::step::{Step, StepOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Wrap each step in a transaction when the step and database allow it.
    pub transactional: bool,
    /// Identity recorded in the run lock.
    pub owner: String,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            transactional: true,
            owner: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedStep {
    pub version: Version,
    pub name: String,
    pub outcome: StepOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub applied: Vec<AppliedStep>,
    /// Catalog steps that were already in the log when the run started.
    pub already_applied: usize,
}

impl RunReport {
    pub fn executed_operations(&self) -> usize {
        self.applied.iter().map(|s| s.outcome.executed).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub version: Version,
    pub name: String,
    pub reversible: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub steps: Vec<StepStatus>,
    /// Log entries with no step in the catalog.
    pub orphaned: Vec<LogEntry>,
}

impl StatusReport {
    pub fn pending_count(&self) -> usize {
        self.steps.iter().filter(|s| s.applied_at.is_none()).count()
    }

    pub fn applied_count(&self) -> usize {
        self.steps.len() - self.pending_count()
    }
}

pub struct MigrationRunner<'a> {
    catalog: &'a Catalog,
    database: &'a dyn Database,
    log: MigrationLog<'a>,
    options: RunnerOptions,
    state: RunnerState,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(catalog: &'a Catalog, database: &'a dyn Database, store: &'a dyn LogStore) -> Self {
        Self {
            catalog,
            database,
            log: MigrationLog::new(store),
            options: RunnerOptions::default(),
            state: RunnerState::Idle,
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn log(&self) -> &MigrationLog<'a> {
        &self.log
    }

    /// Apply every pending step in version order, stopping at the first failure.
    pub fn run(&mut self) -> Result<RunReport> {
        if self.state == RunnerState::Running {
            return Err(Error::InvalidState("a run is already in progress".into()));
        }
        self.state = RunnerState::Running;
        let result = self.run_pending();
        self.state = match result {
            Ok(_) => RunnerState::Complete,
            Err(_) => RunnerState::Failed,
        };
        result
    }

    fn run_pending(&self) -> Result<RunReport> {
        self.log.ensure()?;
        let lock = self.log.lock(&self.options.owner)?;

        for orphan in self.log.orphaned(self.catalog)? {
            warn!(
                "log entry {} ({}) has no step in the catalog",
                orphan.version, orphan.name
            );
        }

        let applied = self.log.applied_versions()?;
        let pending = pending_steps(self.catalog.steps(), &applied);
        let mut report = RunReport {
            applied: Vec::with_capacity(pending.len()),
            already_applied: self.catalog.len() - pending.len(),
        };

        if pending.is_empty() {
            info!("schema is up to date ({} step(s) applied)", report.already_applied);
        } else {
            info!("{} pending step(s)", pending.len());
        }

        for step in pending {
            report.applied.push(self.apply_step(step)?);
        }

        lock.release()?;
        Ok(report)
    }

    fn apply_step(&self, step: &Step) -> Result<AppliedStep> {
        info!("applying {} ({})", step.version, step.name);
        let started = Instant::now();
        let guards = GuardEvaluator::new(self.database);
        let executor = StatementExecutor::new(self.database);

        let result = self.within_transaction(step, || {
            let outcome = step.apply(&guards, &executor)?;
            self.log.record(step)?;
            Ok(outcome)
        });

        match result {
            Ok(outcome) => {
                info!(
                    "applied {} ({}): {} executed, {} skipped",
                    step.version, step.name, outcome.executed, outcome.skipped
                );
                Ok(AppliedStep {
                    version: step.version,
                    name: step.name.clone(),
                    outcome,
                    elapsed: started.elapsed(),
                })
            }
            Err(e) => {
                error!("{e}");
                Err(e)
            }
        }
    }

    /// Reverse the most recently applied step and drop its log entry.
    /// Returns `None` when the log is empty.
    pub fn rollback_last(&mut self) -> Result<Option<AppliedStep>> {
        if matches!(self.state, RunnerState::Running | RunnerState::Failed) {
            return Err(Error::InvalidState(format!(
                "cannot roll back from {:?}",
                self.state
            )));
        }
        match self.rollback_one() {
            Ok(rolled_back) => {
                self.state = RunnerState::Complete;
                Ok(rolled_back)
            }
            Err(e @ Error::ReversalUnsupported { .. }) => Err(e),
            Err(e) => {
                self.state = RunnerState::Failed;
                Err(e)
            }
        }
    }

    /// Roll back up to `steps` steps, newest first.
    pub fn rollback(&mut self, steps: usize) -> Result<Vec<AppliedStep>> {
        let mut rolled_back = Vec::new();
        for _ in 0..steps {
            match self.rollback_last()? {
                Some(step) => rolled_back.push(step),
                None => break,
            }
        }
        Ok(rolled_back)
    }

    fn rollback_one(&self) -> Result<Option<AppliedStep>> {
        self.log.ensure()?;
        let lock = self.log.lock(&self.options.owner)?;

        let Some(last) = self.log.last()? else {
            info!("nothing to roll back");
            lock.release()?;
            return Ok(None);
        };
        let step = self.catalog.get(last.version).ok_or_else(|| {
            Error::NotFound(format!(
                "step {} ({}) is recorded as applied but missing from the catalog",
                last.version, last.name
            ))
        })?;
        if !step.reversible {
            return Err(Error::ReversalUnsupported {
                version: step.version,
                name: step.name.clone(),
            });
        }

        info!("rolling back {} ({})", step.version, step.name);
        let started = Instant::now();
        let guards = GuardEvaluator::new(self.database);
        let executor = StatementExecutor::new(self.database);
        let outcome = self.within_transaction(step, || {
            let outcome = step.reverse(&guards, &executor)?;
            self.log.remove(step.version)?;
            Ok(outcome)
        })?;

        lock.release()?;
        info!(
            "rolled back {} ({}): {} executed, {} skipped",
            step.version, step.name, outcome.executed, outcome.skipped
        );
        Ok(Some(AppliedStep {
            version: step.version,
            name: step.name.clone(),
            outcome,
            elapsed: started.elapsed(),
        }))
    }

    /// Every catalog step with its applied time, plus orphaned log entries.
    pub fn status(&self) -> Result<StatusReport> {
        self.log.ensure()?;
        let entries = self.log.entries()?;
        let steps = self
            .catalog
            .steps()
            .iter()
            .map(|step| StepStatus {
                version: step.version,
                name: step.name.clone(),
                reversible: step.reversible,
                applied_at: entries
                    .iter()
                    .find(|e| e.version == step.version)
                    .map(|e| e.applied_at),
            })
            .collect();
        let orphaned = entries
            .into_iter()
            .filter(|e| self.catalog.get(e.version).is_none())
            .collect();
        Ok(StatusReport { steps, orphaned })
    }

    fn uses_transaction(&self, step: &Step) -> bool {
        self.options.transactional && step.transactional && self.database.supports_transactional_ddl()
    }

    /// Run `body` inside a transaction when `step` allows it; without one the
    /// body itself is responsible for writing the log last.
    fn within_transaction<T>(&self, step: &Step, body: impl FnOnce() -> Result<T>) -> Result<T> {
        if !self.uses_transaction(step) {
            return body();
        }

        self.database.begin()?;
        let result = body().and_then(|value| self.database.commit().map(|_| value));
        if result.is_err() {
            if let Err(e) = self.database.rollback() {
                warn!("rollback of {} ({}) failed: {e}", step.version, step.name);
            }
        }
        result
    }
}
