//! Test Lifecycle
//!
//! Runner hooks that drive the scoped stores: bind the worker at test start,
//! sweep the test's entities and cookies at test end, sweep whatever is left
//! at suite end.
//!
//! ```ignore
//! let lifecycle = TestLifecycle::new(Arc::new(ScopeServices::new(deleter)));
//! lifecycle.begin_suite();
//!
//! // on each worker
//! let guard = lifecycle.guard(TestName::new("test_checkout")?);
//! lifecycle.services().users.add(user);
//! drop(guard); // deletes the user, drops the cookies
//!
//! let leftovers = lifecycle.end_suite();
//! ```

use crate::entity::{EntityDeleter, EphemeralEntityStore, TeardownReport};
use crate::identity::{IdentityRegistry, TestName};
use crate::issue::{DisabledByIssue, IssueStateStore, SkipDecision};
use crate::session::SessionStore;
use crate::user::User;
use std::sync::Arc;
use uuid::Uuid;

/// The scoped stores of one suite run
#[derive(Debug)]
pub struct ScopeServices {
    /// Which test each worker is running
    pub identity: Arc<IdentityRegistry>,
    /// Per-test cookies
    pub sessions: Arc<SessionStore>,
    /// Per-test users to delete at teardown
    pub users: Arc<EphemeralEntityStore<User>>,
    /// Tracker issue states for gated tests
    pub issues: Arc<IssueStateStore>,
}

impl ScopeServices {
    /// Services keyed by OS thread, deleting users with `user_deleter`
    #[must_use]
    pub fn new(user_deleter: Arc<dyn EntityDeleter<User>>) -> Self {
        Self::with_identity(Arc::new(IdentityRegistry::new()), user_deleter)
    }

    /// Services sharing an existing identity registry
    #[must_use]
    pub fn with_identity(
        identity: Arc<IdentityRegistry>,
        user_deleter: Arc<dyn EntityDeleter<User>>,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new(Arc::clone(&identity))),
            users: Arc::new(EphemeralEntityStore::new(
                Arc::clone(&identity),
                user_deleter,
            )),
            issues: Arc::new(IssueStateStore::new()),
            identity,
        }
    }

    /// Name of the test the calling worker is running
    #[must_use]
    pub fn current_test_name(&self) -> TestName {
        self.identity.current_test_name()
    }
}

/// Runner hooks over [`ScopeServices`]
#[derive(Debug)]
pub struct TestLifecycle {
    services: Arc<ScopeServices>,
    invocation_id: Uuid,
}

impl TestLifecycle {
    /// Create hooks for one suite invocation
    #[must_use]
    pub fn new(services: Arc<ScopeServices>) -> Self {
        Self {
            services,
            invocation_id: Uuid::new_v4(),
        }
    }

    /// The services the hooks drive
    #[must_use]
    pub fn services(&self) -> &Arc<ScopeServices> {
        &self.services
    }

    /// Id attached to every lifecycle span of this invocation
    #[must_use]
    pub const fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    /// Suite setup: the calling worker works on behalf of GLOBAL
    pub fn begin_suite(&self) {
        let _span = tracing::info_span!("begin_suite", invocation = %self.invocation_id).entered();
        self.services.identity.bind(&TestName::global());
        tracing::info!("suite started");
    }

    /// Test setup: bind the calling worker to `name`
    pub fn begin_test(&self, name: &TestName) {
        let _span =
            tracing::info_span!("begin_test", invocation = %self.invocation_id, test = %name)
                .entered();
        self.services.identity.bind(name);
    }

    /// Whether a gated test should run, given the collected issue states
    #[must_use]
    pub fn check_gate(&self, gate: &DisabledByIssue) -> SkipDecision {
        let decision = gate.decide(&self.services.issues);
        if decision != SkipDecision::Run {
            tracing::info!(issue_id = gate.issue_id, ?decision, "gated test not run");
        }
        decision
    }

    /// Test teardown.
    ///
    /// Deletes the users registered under `name`, drops its cookies and
    /// releases the calling worker, which then resolves to GLOBAL. Deletion
    /// failures are reported, never raised.
    pub fn end_test(&self, name: &TestName) -> TeardownReport<User> {
        let _span =
            tracing::info_span!("end_test", invocation = %self.invocation_id, test = %name)
                .entered();
        let services = &self.services;

        services.identity.bind(name);
        let report = services.users.remove_for_current_test();
        services.sessions.discard(name);

        services.identity.release();
        services.identity.clear(name);
        report
    }

    /// Suite teardown: delete every user still registered under any test
    pub fn end_suite(&self) -> TeardownReport<User> {
        let _span = tracing::info_span!("end_suite", invocation = %self.invocation_id).entered();
        let services = &self.services;

        services.identity.bind(&TestName::global());
        let report = services.users.remove_all();
        services.sessions.discard_all();
        for name in services.identity.test_names() {
            services.identity.clear(&name);
        }

        let not_removed = services.users.not_removed();
        if !not_removed.is_empty() {
            tracing::warn!(
                count = not_removed.len(),
                "users left on the backend after the run"
            );
        }
        tracing::info!(removed = report.removed.len(), "suite finished");
        report
    }

    /// Begin `name` and return a guard that ends it when dropped
    #[must_use]
    pub fn guard(&self, name: TestName) -> TestGuard<'_> {
        self.begin_test(&name);
        TestGuard {
            lifecycle: self,
            name,
            finished: false,
        }
    }
}

/// Ends a test on drop, including during unwinding from a failed assertion
#[derive(Debug)]
pub struct TestGuard<'a> {
    lifecycle: &'a TestLifecycle,
    name: TestName,
    finished: bool,
}

impl TestGuard<'_> {
    /// The guarded test
    #[must_use]
    pub const fn name(&self) -> &TestName {
        &self.name
    }

    /// End the test now and return its teardown report
    pub fn finish(mut self) -> TeardownReport<User> {
        self.finished = true;
        self.lifecycle.end_test(&self.name)
    }
}

impl Drop for TestGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.lifecycle.end_test(&self.name);
        }
    }
}
