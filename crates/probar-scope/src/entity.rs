//! Ephemeral Entity Store
//!
//! Tracks backend resources (user accounts) created as test fixtures so they
//! can be deleted when the owning test, or the whole run, ends.
//!
//! Teardown is best effort and always terminates: a failed deletion is
//! recorded in the report and in the `not_removed` list, logged, and never
//! retried here. Wrap the deleter in a [`RetryingDeleter`] if retries are
//! wanted.

use crate::identity::{IdentityRegistry, TestName};
use crate::retry::{retry, RetryPolicy};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Error raised by a deletion collaborator
pub type DeleteError = Box<dyn std::error::Error + Send + Sync>;

/// A backend resource owed a deletion at teardown
pub trait EphemeralEntity: Clone + Send + Sync + fmt::Debug {
    /// Stable identity used as the bucket key (e.g. an email address)
    fn key(&self) -> String;

    /// Identifying fields for diagnostics
    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// Backend operation that deletes an entity
pub trait EntityDeleter<E>: Send + Sync {
    /// Delete `entity` from the backend.
    ///
    /// # Errors
    ///
    /// Any error marks the deletion as failed; it is not interpreted further.
    fn delete(&self, entity: &E) -> Result<(), DeleteError>;
}

impl<E, F> EntityDeleter<E> for F
where
    F: Fn(&E) -> Result<(), DeleteError> + Send + Sync,
{
    fn delete(&self, entity: &E) -> Result<(), DeleteError> {
        self(entity)
    }
}

/// Deleter that retries another deleter under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryingDeleter<D> {
    inner: D,
    policy: RetryPolicy,
}

impl<D> RetryingDeleter<D> {
    /// Wrap `inner`
    #[must_use]
    pub const fn new(inner: D, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<E, D> EntityDeleter<E> for RetryingDeleter<D>
where
    D: EntityDeleter<E>,
{
    fn delete(&self, entity: &E) -> Result<(), DeleteError> {
        retry(&self.policy, || self.inner.delete(entity), |last| last)
    }
}

/// An entity whose deletion failed
#[derive(Debug, Clone)]
pub struct FailedRemoval<E> {
    /// The entity left behind on the backend
    pub entity: E,
    /// Deletion error message
    pub error: String,
}

/// Outcome of a teardown sweep
#[derive(Debug, Clone)]
pub struct TeardownReport<E> {
    /// Entities deleted from the backend
    pub removed: Vec<E>,
    /// Entities whose deletion failed
    pub failed: Vec<FailedRemoval<E>>,
}

impl<E> Default for TeardownReport<E> {
    fn default() -> Self {
        Self {
            removed: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<E> TeardownReport<E> {
    /// Check if every deletion succeeded
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of deletions attempted
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.removed.len() + self.failed.len()
    }
}

type Bucket<E> = BTreeMap<String, E>;

/// Per-test registry of entities to delete at teardown
pub struct EphemeralEntityStore<E: EphemeralEntity> {
    identity: Arc<IdentityRegistry>,
    deleter: Arc<dyn EntityDeleter<E>>,
    buckets: Mutex<HashMap<TestName, Bucket<E>>>,
    not_removed: Mutex<Vec<E>>,
}

impl<E: EphemeralEntity> fmt::Debug for EphemeralEntityStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralEntityStore")
            .field("tests", &self.lock().len())
            .field("not_removed", &self.lock_not_removed().len())
            .finish()
    }
}

impl<E: EphemeralEntity> EphemeralEntityStore<E> {
    /// Create a store scoped through `identity` that deletes with `deleter`
    #[must_use]
    pub fn new(identity: Arc<IdentityRegistry>, deleter: Arc<dyn EntityDeleter<E>>) -> Self {
        Self {
            identity,
            deleter,
            buckets: Mutex::new(HashMap::new()),
            not_removed: Mutex::new(Vec::new()),
        }
    }

    /// Register an entity under the current test; same key overwrites
    pub fn add(&self, entity: E) {
        self.add_all([entity]);
    }

    /// Register several entities under the current test
    pub fn add_all(&self, entities: impl IntoIterator<Item = E>) {
        let test = self.identity.current_test_name();
        let mut buckets = self.lock();
        let bucket = buckets.entry(test).or_default();
        for entity in entities {
            let _ = bucket.insert(entity.key(), entity);
        }
    }

    /// Look up an entity of the current test
    #[must_use]
    pub fn get(&self, key: &str) -> Option<E> {
        let test = self.identity.current_test_name();
        self.lock().get(&test).and_then(|b| b.get(key)).cloned()
    }

    /// Entities of the current test
    #[must_use]
    pub fn list_for_current_test(&self) -> Vec<E> {
        let test = self.identity.current_test_name();
        self.lock()
            .get(&test)
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Entities of every test
    #[must_use]
    pub fn list_all(&self) -> Vec<E> {
        self.lock()
            .values()
            .flat_map(|b| b.values().cloned())
            .collect()
    }

    /// Replace the entity stored under `key`.
    ///
    /// The replacement is re-keyed by its own [`EphemeralEntity::key`].
    /// Returns `false`, leaving the bucket untouched, when `key` is absent or
    /// the new key already belongs to another entity of the test.
    pub fn update(&self, key: &str, new_entity: E) -> bool {
        let test = self.identity.current_test_name();
        let new_key = new_entity.key();
        let mut buckets = self.lock();
        let Some(bucket) = buckets.get_mut(&test) else {
            return false;
        };
        if !bucket.contains_key(key) {
            return false;
        }
        if new_key != key && bucket.contains_key(&new_key) {
            tracing::warn!(test = %test, key, new_key = %new_key, "update would replace another entity");
            return false;
        }
        let _ = bucket.remove(key);
        let _ = bucket.insert(new_key, new_entity);
        true
    }

    /// Delete the current test's entities from the backend and drop its bucket
    pub fn remove_for_current_test(&self) -> TeardownReport<E> {
        let test = self.identity.current_test_name();
        let entities: Vec<E> = self
            .lock()
            .remove(&test)
            .map(|b| b.into_values().collect())
            .unwrap_or_default();
        self.delete_each(entities, test.as_str())
    }

    /// Delete every test's entities from the backend and clear the registry
    pub fn remove_all(&self) -> TeardownReport<E> {
        let entities: Vec<E> = self
            .lock()
            .drain()
            .flat_map(|(_, b)| b.into_values())
            .collect();
        self.delete_each(entities, "all tests")
    }

    /// Entities whose deletion failed during any sweep so far
    #[must_use]
    pub fn not_removed(&self) -> Vec<E> {
        self.lock_not_removed().clone()
    }

    // The deleter does I/O, so no store lock is held while it runs.
    fn delete_each(&self, entities: Vec<E>, scope: &str) -> TeardownReport<E> {
        let mut report = TeardownReport::default();
        for entity in entities {
            match self.deleter.delete(&entity) {
                Ok(()) => report.removed.push(entity),
                Err(err) => report.failed.push(FailedRemoval {
                    entity,
                    error: err.to_string(),
                }),
            }
        }

        if !report.failed.is_empty() {
            self.lock_not_removed()
                .extend(report.failed.iter().map(|f| f.entity.clone()));
            let details: Vec<String> = report
                .failed
                .iter()
                .map(|f| format!("{} ({})", f.entity.describe(), f.error))
                .collect();
            tracing::warn!(
                scope,
                failed = report.failed.len(),
                "Failed to remove entities:\n{}",
                details.join("\n")
            );
        }
        tracing::debug!(scope, removed = report.removed.len(), "entity teardown finished");
        report
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TestName, Bucket<E>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_not_removed(&self) -> MutexGuard<'_, Vec<E>> {
        self.not_removed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
