//! Execution Identity Registry
//!
//! Resolves which test the calling execution unit is running, so the session
//! and entity stores can partition their state per test without a context
//! value being threaded through every call.
//!
//! A unit is normally an OS thread. Runners that multiplex tests over tasks
//! supply their own [`UnitResolver`] and hand out [`ExecutionUnitId::Logical`]
//! ids.
//!
//! The registry is only as correct as the lifecycle that drives it: bind at
//! test start, clear at test end, one test per unit at a time.

use crate::result::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use uuid::Uuid;

/// Sentinel test name for work done outside any individual test
pub const GLOBAL_TEST_NAME: &str = "GLOBAL";

/// Name of the test currently running on an execution unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TestName(String);

impl TestName {
    /// Create a test name.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::InvalidTestName`] for blank names.
    pub fn new(name: impl Into<String>) -> ScopeResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ScopeError::InvalidTestName {
                message: "test name must not be blank".to_string(),
            });
        }
        Ok(Self(name))
    }

    /// The GLOBAL sentinel
    #[must_use]
    pub fn global() -> Self {
        Self(GLOBAL_TEST_NAME.to_string())
    }

    /// Check if this is the GLOBAL sentinel
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_TEST_NAME
    }

    /// Borrow the name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TestName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TestName {
    type Error = ScopeError;

    fn try_from(value: String) -> ScopeResult<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TestName {
    type Error = ScopeError;

    fn try_from(value: &str) -> ScopeResult<Self> {
        Self::new(value)
    }
}

impl From<TestName> for String {
    fn from(name: TestName) -> Self {
        name.0
    }
}

/// Identity of a concurrency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionUnitId {
    /// An OS thread
    Thread(ThreadId),
    /// A logical unit allocated by a task-based runner
    Logical(Uuid),
}

impl ExecutionUnitId {
    /// Id of the calling thread
    #[must_use]
    pub fn current_thread() -> Self {
        Self::Thread(std::thread::current().id())
    }

    /// Allocate a fresh logical unit id
    #[must_use]
    pub fn logical() -> Self {
        Self::Logical(Uuid::new_v4())
    }
}

impl fmt::Display for ExecutionUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread(id) => write!(f, "{id:?}"),
            Self::Logical(id) => write!(f, "unit-{id}"),
        }
    }
}

/// Source of the calling unit's identity
pub trait UnitResolver: Send + Sync + fmt::Debug {
    /// Identify the execution unit making the call
    fn current_unit(&self) -> ExecutionUnitId;
}

/// Resolves the calling OS thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadUnitResolver;

impl UnitResolver for ThreadUnitResolver {
    fn current_unit(&self) -> ExecutionUnitId {
        ExecutionUnitId::current_thread()
    }
}

/// Process-wide map of test name to the units running it
#[derive(Debug)]
pub struct IdentityRegistry {
    buckets: Mutex<HashMap<TestName, HashSet<ExecutionUnitId>>>,
    resolver: Arc<dyn UnitResolver>,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityRegistry {
    /// Create a registry keyed by OS thread
    #[must_use]
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(ThreadUnitResolver))
    }

    /// Create a registry with a custom unit resolver
    #[must_use]
    pub fn with_resolver(resolver: Arc<dyn UnitResolver>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            resolver,
        }
    }

    /// Identity of the calling unit
    #[must_use]
    pub fn current_unit(&self) -> ExecutionUnitId {
        self.resolver.current_unit()
    }

    /// Bind the calling unit to `test_name`.
    ///
    /// Any previous association of the unit is dropped in the same critical
    /// section, so a unit never belongs to two tests at once. Binding to the
    /// name the unit already holds is a no-op.
    pub fn bind(&self, test_name: &TestName) {
        let unit = self.current_unit();
        let mut buckets = self.lock();

        if buckets
            .get(test_name)
            .is_some_and(|units| units.contains(&unit))
        {
            return;
        }

        buckets.retain(|name, units| {
            if name != test_name && units.remove(&unit) {
                tracing::debug!(%unit, previous = %name, "unit released from test");
            }
            !units.is_empty()
        });

        let _ = buckets.entry(test_name.clone()).or_default().insert(unit);
        tracing::debug!(%unit, test = %test_name, "unit bound to test");
    }

    /// Name of the test the calling unit is running, or GLOBAL
    #[must_use]
    pub fn current_test_name(&self) -> TestName {
        let unit = self.current_unit();
        let buckets = self.lock();
        buckets
            .iter()
            .find(|(name, units)| !name.is_global() && units.contains(&unit))
            .map(|(name, _)| name.clone())
            .unwrap_or_else(TestName::global)
    }

    /// Release the calling unit from whatever it is bound to.
    ///
    /// A released unit resolves to GLOBAL without occupying the GLOBAL bucket.
    pub fn release(&self) {
        let unit = self.current_unit();
        self.lock().retain(|name, units| {
            if units.remove(&unit) {
                tracing::debug!(%unit, previous = %name, "unit released");
            }
            !units.is_empty()
        });
    }

    /// Drop every association for `test_name`
    pub fn clear(&self, test_name: &TestName) {
        if let Some(units) = self.lock().remove(test_name) {
            tracing::debug!(test = %test_name, units = units.len(), "test identity cleared");
        }
    }

    /// Units currently bound to `test_name`
    #[must_use]
    pub fn bound_units(&self, test_name: &TestName) -> Vec<ExecutionUnitId> {
        self.lock()
            .get(test_name)
            .map(|units| units.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Names with at least one bound unit, sorted
    #[must_use]
    pub fn test_names(&self) -> Vec<TestName> {
        let mut names: Vec<TestName> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if the calling unit is bound to a non-GLOBAL test
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !self.current_test_name().is_global()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TestName, HashSet<ExecutionUnitId>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use std::thread;

    /// Resolver whose unit can be switched by the test
    #[derive(Debug)]
    pub(crate) struct SwitchableResolver {
        unit: Mutex<ExecutionUnitId>,
    }

    impl SwitchableResolver {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                unit: Mutex::new(ExecutionUnitId::logical()),
            })
        }

        pub(crate) fn switch_to(&self, unit: ExecutionUnitId) {
            *self.unit.lock().unwrap() = unit;
        }
    }

    impl UnitResolver for SwitchableResolver {
        fn current_unit(&self) -> ExecutionUnitId {
            *self.unit.lock().unwrap()
        }
    }

    fn name(s: &str) -> TestName {
        TestName::new(s).unwrap()
    }

    mod test_name_tests {
        use super::*;

        #[test]
        fn test_blank_rejected() {
            assert!(TestName::new("").is_err());
            assert!(TestName::new("   ").is_err());
            assert!(TestName::new("test_login").is_ok());
        }

        #[test]
        fn test_global_sentinel() {
            assert!(TestName::global().is_global());
            assert!(name("GLOBAL").is_global());
            assert!(!name("test_cart").is_global());
        }

        #[test]
        fn test_serde_round_trip_rejects_blank() {
            let json = serde_json::to_string(&name("test_cart")).unwrap();
            assert_eq!(json, "\"test_cart\"");
            assert!(serde_json::from_str::<TestName>("\"\"").is_err());
        }
    }

    mod registry_tests {
        use super::*;

        #[test]
        fn test_unbound_unit_is_global() {
            let registry = IdentityRegistry::new();
            assert!(registry.current_test_name().is_global());
            assert!(!registry.is_bound());
        }

        #[test]
        fn test_bind_resolves_current_test() {
            let registry = IdentityRegistry::new();
            registry.bind(&name("test_checkout"));
            assert_eq!(registry.current_test_name(), name("test_checkout"));
            assert!(registry.is_bound());
        }

        #[test]
        fn test_release_leaves_no_bucket_behind() {
            let registry = IdentityRegistry::new();
            registry.bind(&name("test_checkout"));
            registry.release();
            assert!(registry.current_test_name().is_global());
            assert!(registry.test_names().is_empty());

            registry.bind(&TestName::global());
            registry.release();
            assert!(registry.test_names().is_empty());
        }

        #[test]
        fn test_bind_is_idempotent() {
            let registry = IdentityRegistry::new();
            registry.bind(&name("t1"));
            registry.bind(&name("t1"));
            assert_eq!(registry.current_test_name(), name("t1"));
            assert_eq!(registry.bound_units(&name("t1")).len(), 1);
            assert_eq!(registry.test_names(), vec![name("t1")]);
        }

        #[test]
        fn test_rebind_replaces_previous_association() {
            let registry = IdentityRegistry::new();
            registry.bind(&name("t1"));
            registry.bind(&name("t2"));
            assert_eq!(registry.current_test_name(), name("t2"));
            assert!(registry.bound_units(&name("t1")).is_empty());
        }

        #[test]
        fn test_rebind_to_global() {
            let registry = IdentityRegistry::new();
            registry.bind(&TestName::global());
            registry.bind(&name("t1"));
            assert_eq!(registry.current_test_name(), name("t1"));

            registry.bind(&TestName::global());
            assert!(registry.current_test_name().is_global());
            assert_eq!(registry.test_names(), vec![TestName::global()]);
        }

        #[test]
        fn test_clear() {
            let registry = IdentityRegistry::new();
            registry.bind(&name("t1"));
            registry.clear(&name("t1"));
            assert!(registry.current_test_name().is_global());
            // absent bucket is fine
            registry.clear(&name("t1"));
        }

        #[test]
        fn test_clear_leaves_other_tests() {
            let resolver = SwitchableResolver::new();
            let registry = IdentityRegistry::with_resolver(resolver.clone());
            let u1 = ExecutionUnitId::logical();
            let u2 = ExecutionUnitId::logical();

            resolver.switch_to(u1);
            registry.bind(&name("t1"));
            resolver.switch_to(u2);
            registry.bind(&name("t2"));

            registry.clear(&name("t1"));
            assert_eq!(registry.current_test_name(), name("t2"));
            resolver.switch_to(u1);
            assert!(registry.current_test_name().is_global());
        }

        #[test]
        fn test_threads_resolve_independently() {
            let registry = Arc::new(IdentityRegistry::new());
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let registry = Arc::clone(&registry);
                    thread::spawn(move || {
                        let test = name(&format!("test_{i}"));
                        registry.bind(&test);
                        for _ in 0..100 {
                            assert_eq!(registry.current_test_name(), test);
                        }
                        registry.clear(&test);
                        registry.current_test_name()
                    })
                })
                .collect();

            for handle in handles {
                assert!(handle.join().unwrap().is_global());
            }
            assert!(registry.test_names().is_empty());
        }

        #[test]
        fn test_logical_units_are_distinct() {
            assert_ne!(ExecutionUnitId::logical(), ExecutionUnitId::logical());
            assert_eq!(
                ExecutionUnitId::current_thread(),
                ExecutionUnitId::current_thread()
            );
        }
    }
}
