use strata_common::{Error, Result, Version};
use tracing::debug;

use crate::executor::StatementExecutor;
use crate::guard::{Guard, GuardEvaluator};
use crate::operation::{Direction, Operation};

/// One versioned unit of change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub version: Version,
    pub name: String,
    pub operations: Vec<Operation>,
    pub reversible: bool,
    /// Run inside a transaction when the database allows it.
    pub transactional: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub executed: usize,
    pub skipped: usize,
}

impl Step {
    pub fn new(version: impl Into<Version>, name: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            operations: Vec::new(),
            reversible: false,
            transactional: true,
        }
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn reversible(mut self) -> Self {
        self.reversible = true;
        self
    }

    pub fn non_transactional(mut self) -> Self {
        self.transactional = false;
        self
    }

    /// Run every operation `up`, in declared order. Stops at the first
    /// failure; operations before it stay applied.
    pub fn apply(
        &self,
        guards: &GuardEvaluator<'_>,
        executor: &StatementExecutor<'_>,
    ) -> Result<StepOutcome> {
        let mut outcome = StepOutcome::default();
        for operation in &self.operations {
            self.run(operation, operation.guard, Direction::Up, guards, executor, &mut outcome)?;
        }
        Ok(outcome)
    }

    /// Run every operation `down`, in reverse declared order.
    pub fn reverse(
        &self,
        guards: &GuardEvaluator<'_>,
        executor: &StatementExecutor<'_>,
    ) -> Result<StepOutcome> {
        if !self.reversible {
            return Err(Error::ReversalUnsupported {
                version: self.version,
                name: self.name.clone(),
            });
        }
        let mut outcome = StepOutcome::default();
        for operation in self.operations.iter().rev() {
            let guard = operation.reverse_guard();
            self.run(operation, guard, Direction::Down, guards, executor, &mut outcome)?;
        }
        Ok(outcome)
    }

    fn run(
        &self,
        operation: &Operation,
        guard: Guard,
        direction: Direction,
        guards: &GuardEvaluator<'_>,
        executor: &StatementExecutor<'_>,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        let proceed = guards
            .evaluate(guard, &operation.action.target())
            .map_err(|e| Error::GuardEvaluation {
                version: self.version,
                name: self.name.clone(),
                source: Box::new(e),
            })?;

        if !proceed {
            debug!(
                "{} ({}): skipping {} ({guard:?} is false)",
                self.version,
                self.name,
                operation.action.kind()
            );
            outcome.skipped += 1;
            return Ok(());
        }

        executor
            .execute(&operation.action, direction)
            .map_err(|source| Error::Execution {
                version: self.version,
                name: self.name.clone(),
                source,
            })?;
        outcome.executed += 1;
        Ok(())
    }
}
