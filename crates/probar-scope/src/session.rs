//! Session State Store
//!
//! Per-test cookie buckets. API clients fold the cookies of every response
//! into the bucket of the test running on the calling unit and attach the
//! bucket to the next outgoing request; UI tests inject it into the browser.
//!
//! Two tests on two units never observe each other's cookies, provided each
//! unit is bound to exactly one test through the [`IdentityRegistry`].

use crate::browser::{inject_cookies, BrowserCookie, CookieSink};
use crate::identity::{IdentityRegistry, TestName};
use crate::result::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cookie name to value
pub type CookieMap = BTreeMap<String, String>;

/// Cookies carried by an HTTP response
pub trait CookieResponse {
    /// Name/value pairs set by this response, in header order
    fn cookies(&self) -> Vec<(String, String)>;

    /// Responses that preceded this one in a redirect chain, oldest first
    fn history(&self) -> &[Self]
    where
        Self: Sized,
    {
        &[]
    }
}

/// A response reduced to what the session store needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    /// HTTP status code
    pub status: u16,
    /// Cookies set by this response
    pub cookies: Vec<(String, String)>,
    /// Redirect chain, oldest first
    pub history: Vec<RecordedResponse>,
}

impl RecordedResponse {
    /// Create a response with no cookies
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Add a cookie
    #[must_use]
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push((name.to_string(), value.to_string()));
        self
    }

    /// Add a cookie from a raw `Set-Cookie` header value.
    ///
    /// Only the leading `name=value` pair is kept; attributes are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error when the header has no `name=value` pair.
    pub fn with_set_cookie_header(mut self, header: &str) -> ScopeResult<Self> {
        self.cookies.push(parse_set_cookie(header)?);
        Ok(self)
    }

    /// Append a prior response to the redirect chain
    #[must_use]
    pub fn with_redirect(mut self, response: RecordedResponse) -> Self {
        self.history.push(response);
        self
    }
}

impl CookieResponse for RecordedResponse {
    fn cookies(&self) -> Vec<(String, String)> {
        self.cookies.clone()
    }

    fn history(&self) -> &[Self] {
        &self.history
    }
}

fn parse_set_cookie(header: &str) -> ScopeResult<(String, String)> {
    let pair = header.split(';').next().unwrap_or_default();
    let (name, value) = pair
        .split_once('=')
        .ok_or_else(|| ScopeError::unsupported_cookies(format!("Set-Cookie without '=': {header}")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ScopeError::unsupported_cookies(format!(
            "Set-Cookie without a name: {header}"
        )));
    }
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Ok((name.to_string(), value.to_string()))
}

/// Cookies supplied from outside the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieInput {
    /// Name to value mapping
    Map(CookieMap),
    /// Cookie records, e.g. read back from a browser
    Jar(Vec<BrowserCookie>),
    /// Name/value pairs
    Pairs(Vec<(String, String)>),
}

impl CookieInput {
    fn into_pairs(self) -> ScopeResult<Vec<(String, String)>> {
        let pairs: Vec<(String, String)> = match self {
            Self::Map(map) => map.into_iter().collect(),
            Self::Jar(jar) => jar.into_iter().map(|c| (c.name, c.value)).collect(),
            Self::Pairs(pairs) => pairs,
        };
        if let Some((_, value)) = pairs.iter().find(|(name, _)| name.is_empty()) {
            return Err(ScopeError::unsupported_cookies(format!(
                "cookie with empty name (value {value:?})"
            )));
        }
        Ok(pairs)
    }
}

impl From<CookieMap> for CookieInput {
    fn from(map: CookieMap) -> Self {
        Self::Map(map)
    }
}

impl From<HashMap<String, String>> for CookieInput {
    fn from(map: HashMap<String, String>) -> Self {
        Self::Map(map.into_iter().collect())
    }
}

impl From<Vec<BrowserCookie>> for CookieInput {
    fn from(jar: Vec<BrowserCookie>) -> Self {
        Self::Jar(jar)
    }
}

impl From<Vec<(String, String)>> for CookieInput {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self::Pairs(pairs)
    }
}

impl From<CookieSet> for CookieInput {
    fn from(set: CookieSet) -> Self {
        Self::Map(set.0)
    }
}

impl TryFrom<Value> for CookieInput {
    type Error = ScopeError;

    /// Accepts an object of string values, a list of `[name, value]` pairs,
    /// or a list of `{"name": .., "value": ..}` records.
    fn try_from(value: Value) -> ScopeResult<Self> {
        match value {
            Value::Object(object) => object
                .into_iter()
                .map(|(name, value)| match value {
                    Value::String(value) => Ok((name, value)),
                    other => Err(ScopeError::unsupported_cookies(format!(
                        "non-string value for cookie {name}: {other}"
                    ))),
                })
                .collect::<ScopeResult<CookieMap>>()
                .map(Self::Map),
            Value::Array(items) => {
                let is_jar = items.first().is_some_and(Value::is_object);
                if is_jar {
                    items
                        .into_iter()
                        .map(|item| {
                            let name = item.get("name").and_then(Value::as_str);
                            let value = item.get("value").and_then(Value::as_str);
                            match (name, value) {
                                (Some(name), Some(value)) => Ok(BrowserCookie::new(name, value, "")),
                                _ => Err(ScopeError::unsupported_cookies(format!(
                                    "Unsupported list item: {item}"
                                ))),
                            }
                        })
                        .collect::<ScopeResult<Vec<_>>>()
                        .map(Self::Jar)
                } else {
                    items
                        .into_iter()
                        .map(|item| match item.as_array().map(Vec::as_slice) {
                            Some([Value::String(name), Value::String(value)]) => {
                                Ok((name.clone(), value.clone()))
                            }
                            _ => Err(ScopeError::unsupported_cookies(format!(
                                "Unsupported list item: {item}"
                            ))),
                        })
                        .collect::<ScopeResult<Vec<_>>>()
                        .map(Self::Pairs)
                }
            }
            other => Err(ScopeError::unsupported_cookies(format!(
                "Unsupported cookies type: {}",
                json_type_name(&other)
            ))),
        }
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Snapshot of a test's cookies for the next outgoing request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSet(CookieMap);

impl CookieSet {
    /// Look up a cookie value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Number of cookies
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate name/value pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as a `Cookie` request header value, `None` when empty
    #[must_use]
    pub fn to_header_value(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            self.iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Unwrap into the underlying map
    #[must_use]
    pub fn into_map(self) -> CookieMap {
        self.0
    }
}

/// Per-test cookie buckets
#[derive(Debug)]
pub struct SessionStore {
    identity: Arc<IdentityRegistry>,
    buckets: Mutex<HashMap<TestName, CookieMap>>,
}

impl SessionStore {
    /// Create a store scoped through `identity`
    #[must_use]
    pub fn new(identity: Arc<IdentityRegistry>) -> Self {
        Self {
            identity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Cookie value for the current test
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let test = self.identity.current_test_name();
        self.lock().get(&test).and_then(|b| b.get(name)).cloned()
    }

    /// The requested cookies that are present for the current test
    pub fn get_many<I, S>(&self, names: I) -> CookieMap
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let test = self.identity.current_test_name();
        let buckets = self.lock();
        let Some(bucket) = buckets.get(&test) else {
            return CookieMap::new();
        };
        names
            .into_iter()
            .filter_map(|name| {
                let name = name.as_ref();
                bucket
                    .get(name)
                    .map(|value| (name.to_string(), value.clone()))
            })
            .collect()
    }

    /// Every cookie of the current test
    #[must_use]
    pub fn snapshot(&self) -> CookieMap {
        let test = self.identity.current_test_name();
        self.lock().get(&test).cloned().unwrap_or_default()
    }

    /// Every bucket, for diagnostics
    #[must_use]
    pub fn all_tests_snapshot(&self) -> BTreeMap<TestName, CookieMap> {
        self.lock()
            .iter()
            .map(|(test, bucket)| (test.clone(), bucket.clone()))
            .collect()
    }

    /// Upsert one cookie
    pub fn set_one(&self, name: impl Into<String>, value: impl Into<String>) {
        self.set_many([(name.into(), value.into())]);
    }

    /// Upsert many cookies; later entries win
    pub fn set_many<I, K, V>(&self, cookies: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let test = self.identity.current_test_name();
        let mut buckets = self.lock();
        let bucket = buckets.entry(test).or_default();
        for (name, value) in cookies {
            let _ = bucket.insert(name.into(), value.into());
        }
    }

    /// Fold the cookies of a response into the current test's bucket.
    ///
    /// Redirect responses are applied oldest first and the final response
    /// last, so the final response wins on conflicts.
    pub fn ingest_from_response<R: CookieResponse>(&self, response: &R) {
        let cookies = response
            .history()
            .iter()
            .flat_map(|prior| prior.cookies())
            .chain(response.cookies());
        self.set_many(cookies);
    }

    /// Upsert cookies supplied in any supported shape.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::UnsupportedCookieShape`] for an empty cookie
    /// name; nothing is written in that case.
    pub fn ingest_external(&self, cookies: impl Into<CookieInput>) -> ScopeResult<()> {
        let pairs = cookies.into().into_pairs()?;
        self.set_many(pairs);
        Ok(())
    }

    /// Upsert cookies from untyped input.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::UnsupportedCookieShape`] for any shape other
    /// than an object, a pair list or a record list.
    pub fn ingest_json(&self, cookies: Value) -> ScopeResult<()> {
        self.ingest_external(CookieInput::try_from(cookies)?)
    }

    /// Remove cookies from the current test's bucket
    pub fn remove<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let test = self.identity.current_test_name();
        if let Some(bucket) = self.lock().get_mut(&test) {
            for name in names {
                let _ = bucket.remove(name.as_ref());
            }
        }
    }

    /// Empty the current test's bucket
    pub fn clear_for_current_test(&self) {
        let test = self.identity.current_test_name();
        let _ = self.lock().insert(test, CookieMap::new());
    }

    /// Cookies to attach to the current test's next request
    #[must_use]
    pub fn export_for_outgoing_request(&self) -> CookieSet {
        CookieSet(self.snapshot())
    }

    /// Inject the current test's cookies into a browser session
    ///
    /// # Errors
    ///
    /// Propagates browser driver failures.
    pub fn inject_into_browser(&self, sink: &mut dyn CookieSink, domain: &str) -> ScopeResult<usize> {
        let cookies = self.snapshot();
        inject_cookies(sink, cookies.into_iter().map(|(k, v)| (k, Some(v))), domain)
    }

    /// Drop a test's bucket entirely
    pub(crate) fn discard(&self, test: &TestName) {
        if let Some(bucket) = self.lock().remove(test) {
            tracing::debug!(test = %test, cookies = bucket.len(), "cookie bucket dropped");
        }
    }

    /// Drop every bucket
    pub(crate) fn discard_all(&self) {
        let mut buckets = self.lock();
        tracing::debug!(tests = buckets.len(), "all cookie buckets dropped");
        buckets.clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TestName, CookieMap>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
