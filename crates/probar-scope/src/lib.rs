//! Probar Scope: Thread-Scoped Test Context for Parallel E2E Suites
//!
//! Parallel workers share one set of stores; each worker sees only the state
//! of the test it is running. The test identity is resolved from the calling
//! execution unit, so helpers deep inside a test need no context argument.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     PROBAR SCOPE                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │   ┌─────────────┐  bind/clear  ┌──────────────────┐           │
//! │   │ TestLifecycle│────────────►│ IdentityRegistry │           │
//! │   └──────┬──────┘              └────────┬─────────┘           │
//! │          │ teardown          current test│                    │
//! │          ▼                               ▼                    │
//! │   ┌──────────────────┐   ┌──────────────────┐                 │
//! │   │ EphemeralEntity  │   │ SessionStore     │──► CookieSink   │
//! │   │ Store<User>      │   │ (cookie buckets) │    (browser)    │
//! │   └────────┬─────────┘   └──────────────────┘                 │
//! │            │ delete (retry)                                   │
//! │            ▼                                                  │
//! │       backend API                                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use probar_scope::{ScopeServices, TestLifecycle, TestName};
//!
//! let lifecycle = TestLifecycle::new(Arc::new(ScopeServices::new(deleter)));
//! let _guard = lifecycle.guard(TestName::new("test_login")?);
//! lifecycle.services().sessions.set_one("sessionid", "abc");
//! ```

#![warn(missing_docs)]

mod artifact;
mod browser;
mod config;
mod entity;
mod identity;
mod issue;
mod lifecycle;
mod logging;
mod result;
mod retry;
mod session;
mod user;

pub use artifact::{ArtifactClient, ArtifactFetcher, ArtifactResponse, STATUS_OK};
pub use browser::{inject_cookies, next_year_unix_timestamp, BrowserCookie, CookieSink, SameSite};
pub use config::{
    ArtifactConfig, LogConfig, LogFormat, RetrySettings, SuiteConfig, DEFAULT_BASE_URL,
};
pub use entity::{
    DeleteError, EntityDeleter, EphemeralEntity, EphemeralEntityStore, FailedRemoval,
    RetryingDeleter, TeardownReport,
};
pub use identity::{
    ExecutionUnitId, IdentityRegistry, TestName, ThreadUnitResolver, UnitResolver,
    GLOBAL_TEST_NAME,
};
pub use issue::{
    collect_issue_states, DisabledByIssue, IssueState, IssueStateStore, IssueTracker,
    SkipDecision,
};
pub use lifecycle::{ScopeServices, TestGuard, TestLifecycle};
pub use logging::init_logging;
pub use result::{ScopeError, ScopeResult};
pub use retry::{retry, RetryPolicy, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};
pub use session::{CookieInput, CookieMap, CookieResponse, CookieSet, RecordedResponse, SessionStore};
pub use user::{TestData, User, UserApi, UserApiDeleter, UserTitle};
