//! Issue-gated tests
//!
//! A test may be marked as disabled by a tracker issue. Before the run, the
//! state of every referenced issue is fetched once into an [`IssueStateStore`];
//! when a marked test starts, [`DisabledByIssue::decide`] skips it while the
//! issue is open and fails it when the state could not be determined.

use crate::result::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

/// State of a tracker issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    /// Still open; gated tests are skipped
    Open,
    /// Closed; gated tests run
    Closed,
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl FromStr for IssueState {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(ScopeError::config(format!("unknown issue state: {other}"))),
        }
    }
}

/// Issue states collected for the run, shared by all workers
#[derive(Debug, Default)]
pub struct IssueStateStore {
    states: Mutex<HashMap<u64, Option<IssueState>>>,
}

impl IssueStateStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the state of an issue; `None` marks it as looked up but unknown
    pub fn set_issue_state(&self, issue_id: u64, state: Option<IssueState>) {
        let _ = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(issue_id, state);
    }

    /// State of an issue, if known
    #[must_use]
    pub fn issue_state(&self, issue_id: u64) -> Option<IssueState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&issue_id)
            .copied()
            .flatten()
    }

    /// Every issue id recorded so far, ascending
    #[must_use]
    pub fn issue_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Source of issue states
pub trait IssueTracker {
    /// Look up the current state of an issue.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::IssueLookup`] when the tracker cannot answer.
    fn issue_state(&self, issue_id: u64) -> ScopeResult<IssueState>;
}

/// Query `tracker` once per distinct issue id and record the answers.
///
/// Lookup failures are logged and skipped, leaving the issue unknown so
/// that the gated test fails at setup. Returns how many states were stored.
pub fn collect_issue_states<I>(
    tracker: &dyn IssueTracker,
    store: &IssueStateStore,
    issue_ids: I,
) -> usize
where
    I: IntoIterator<Item = u64>,
{
    let distinct: BTreeSet<u64> = issue_ids.into_iter().collect();
    let mut stored = 0;
    for issue_id in distinct {
        match tracker.issue_state(issue_id) {
            Ok(state) => {
                store.set_issue_state(issue_id, Some(state));
                stored += 1;
            }
            Err(err) => tracing::warn!(issue_id, error = %err, "issue state lookup failed"),
        }
    }
    tracing::debug!(stored, "issue states collected");
    stored
}

/// Outcome of the setup check for a gated test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    /// Run the test
    Run,
    /// Skip the test with this reason
    Skip(String),
    /// Fail the test with this message
    Fail(String),
}

/// Marks a test as disabled while a tracker issue stays open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisabledByIssue {
    /// Issue number
    pub issue_id: u64,
    /// Skip reason
    pub reason: String,
}

impl DisabledByIssue {
    /// Gate on `issue_id` with the default reason
    #[must_use]
    pub fn new(issue_id: u64) -> Self {
        Self {
            issue_id,
            reason: format!("Disabled by issue: {issue_id}"),
        }
    }

    /// Override the skip reason
    #[must_use]
    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_string();
        self
    }

    /// Decide whether the gated test runs
    #[must_use]
    pub fn decide(&self, store: &IssueStateStore) -> SkipDecision {
        match store.issue_state(self.issue_id) {
            None => SkipDecision::Fail(format!("Not found issue by id: {}", self.issue_id)),
            Some(IssueState::Open) => SkipDecision::Skip(self.reason.clone()),
            Some(IssueState::Closed) => SkipDecision::Run,
        }
    }
}
