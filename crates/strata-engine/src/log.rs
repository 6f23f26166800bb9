//! The durable record of applied steps and the run lock guarding it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_common::{Result, Version};
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::step::Step;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub version: Version,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Storage for the migration history, colocated with the target database.
pub trait LogStore {
    /// Create the history and lock tables if they do not exist.
    fn ensure_log(&self) -> Result<()>;

    /// All entries, ascending by version.
    fn read_applied(&self) -> Result<Vec<LogEntry>>;

    fn append(&self, entry: &LogEntry) -> Result<()>;

    /// Remove the entry for `version`; returns whether one existed.
    fn remove(&self, version: Version) -> Result<bool>;

    /// Take the single run lock for `owner`, failing with
    /// `Error::ConcurrentRun` when someone else holds it.
    fn acquire_lock(&self, owner: &str) -> Result<()>;

    fn release_lock(&self, owner: &str) -> Result<()>;

    /// Drop the lock regardless of owner; returns whether one was held.
    fn force_release_lock(&self) -> Result<bool>;
}

/// Catalog steps whose version is not in `applied`, ascending by version.
pub fn pending_steps<'c>(steps: &'c [Step], applied: &BTreeSet<Version>) -> Vec<&'c Step> {
    let mut pending: Vec<&Step> = steps
        .iter()
        .filter(|s| !applied.contains(&s.version))
        .collect();
    pending.sort_by_key(|s| s.version);
    pending
}

pub struct MigrationLog<'a> {
    store: &'a dyn LogStore,
}

impl<'a> MigrationLog<'a> {
    pub fn new(store: &'a dyn LogStore) -> Self {
        Self { store }
    }

    pub fn ensure(&self) -> Result<()> {
        self.store.ensure_log()
    }

    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        let mut entries = self.store.read_applied()?;
        entries.sort_by_key(|e| e.version);
        Ok(entries)
    }

    pub fn applied_versions(&self) -> Result<BTreeSet<Version>> {
        Ok(self
            .store
            .read_applied()?
            .into_iter()
            .map(|e| e.version)
            .collect())
    }

    pub fn pending<'c>(&self, catalog: &'c Catalog) -> Result<Vec<&'c Step>> {
        let applied = self.applied_versions()?;
        Ok(pending_steps(catalog.steps(), &applied))
    }

    /// Entries whose version has no step in `catalog`.
    pub fn orphaned(&self, catalog: &Catalog) -> Result<Vec<LogEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| catalog.get(e.version).is_none())
            .collect())
    }

    pub fn last(&self) -> Result<Option<LogEntry>> {
        Ok(self.entries()?.pop())
    }

    pub fn record(&self, step: &Step) -> Result<LogEntry> {
        let entry = LogEntry {
            version: step.version,
            name: step.name.clone(),
            applied_at: Utc::now(),
        };
        self.store.append(&entry)?;
        debug!("recorded {} ({}) as applied", step.version, step.name);
        Ok(entry)
    }

    pub fn remove(&self, version: Version) -> Result<bool> {
        self.store.remove(version)
    }

    pub fn lock(&self, owner: &str) -> Result<LogLock<'a>> {
        self.store.acquire_lock(owner)?;
        debug!("acquired migration lock as {owner}");
        Ok(LogLock {
            store: self.store,
            owner: owner.to_string(),
            released: false,
        })
    }
}

/// Held run lock; released explicitly or on drop.
pub struct LogLock<'a> {
    store: &'a dyn LogStore,
    owner: String,
    released: bool,
}

impl LogLock<'_> {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.release_lock(&self.owner)
    }
}

impl Drop for LogLock<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.store.release_lock(&self.owner) {
                warn!("failed to release migration lock held by {}: {e}", self.owner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeDatabase;
    use strata_common::Error;

    fn step(v: u64) -> Step {
        Step::new(v, format!("step_{v}"))
    }

    #[test]
    fn pending_is_catalog_minus_log_in_ascending_order() {
        let steps = vec![step(30), step(10), step(20), step(40)];
        let applied: BTreeSet<Version> = [Version::new(20), Version::new(99)].into_iter().collect();

        let pending: Vec<u64> = pending_steps(&steps, &applied)
            .iter()
            .map(|s| s.version.get())
            .collect();
        assert_eq!(pending, vec![10, 30, 40]);
    }

    #[test]
    fn pending_holds_for_every_subset_of_a_small_catalog() {
        let steps: Vec<Step> = (1..=5).rev().map(step).collect();
        for mask in 0u32..32 {
            let applied: BTreeSet<Version> = (1..=5)
                .filter(|i| mask & (1 << (i - 1)) != 0)
                .map(Version::new)
                .collect();
            let pending: Vec<Version> = pending_steps(&steps, &applied)
                .iter()
                .map(|s| s.version)
                .collect();
            let expected: Vec<Version> = (1..=5)
                .map(Version::new)
                .filter(|v| !applied.contains(v))
                .collect();
            assert_eq!(pending, expected, "mask {mask:05b}");
        }
    }

    #[test]
    fn record_and_orphans() {
        let db = FakeDatabase::new();
        let log = MigrationLog::new(&db);
        let catalog = Catalog::new(vec![step(1), step(2)]).unwrap();

        log.record(&step(2)).unwrap();
        log.record(&step(7)).unwrap();

        let pending: Vec<u64> = log
            .pending(&catalog)
            .unwrap()
            .iter()
            .map(|s| s.version.get())
            .collect();
        assert_eq!(pending, vec![1]);

        let orphans = log.orphaned(&catalog).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].version, Version::new(7));
        assert_eq!(log.last().unwrap().unwrap().version, Version::new(7));
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let db = FakeDatabase::new();
        let log = MigrationLog::new(&db);

        let held = log.lock("runner-a").unwrap();
        match log.lock("runner-b") {
            Err(Error::ConcurrentRun { owner, .. }) => assert_eq!(owner, "runner-a"),
            other => panic!("expected ConcurrentRun, got {:?}", other.map(|l| l.owner().to_string())),
        }
        drop(held);

        let again = log.lock("runner-b").unwrap();
        again.release().unwrap();
        assert!(db.lock_holder().is_none());
    }
}
