//! Browser Cookie Injection
//!
//! Hands session cookies captured over the API to a browser session so a UI
//! test can start already logged in. The browser driver itself is external;
//! it only has to implement [`CookieSink`].

use crate::result::{ScopeError, ScopeResult};
use chrono::{Local, Months, TimeDelta};
use serde::{Deserialize, Serialize};

/// A cookie as a browser driver reads and writes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Domain the cookie is scoped to
    pub domain: String,
    /// Path, `/` for everything the suite writes
    pub path: String,
    /// Expiry as a unix timestamp; `None` for a session cookie
    pub expires: Option<i64>,
    /// Hidden from page scripts
    pub http_only: bool,
    /// Sent over HTTPS only
    pub secure: bool,
    /// Cross-site policy
    pub same_site: SameSite,
}

impl BrowserCookie {
    /// Session cookie for the whole of `domain`
    #[must_use]
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: SameSite::Lax,
        }
    }

    /// Cookie the way the application itself sets it: valid for a year,
    /// readable by scripts, sent over plain HTTP, SameSite=Lax
    #[must_use]
    pub fn app_cookie(name: &str, value: &str, domain: &str) -> Self {
        Self {
            expires: Some(next_year_unix_timestamp()),
            ..Self::new(name, value, domain)
        }
    }
}

/// Same site cookie setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    /// Strict same site
    Strict,
    /// Lax same site
    Lax,
    /// No same site restriction
    None,
}

/// Unix timestamp one calendar year from now
#[must_use]
pub fn next_year_unix_timestamp() -> i64 {
    let now = Local::now();
    now.checked_add_months(Months::new(12))
        .unwrap_or_else(|| now + TimeDelta::days(365))
        .timestamp()
}

/// Cookie surface of a browser session
pub trait CookieSink {
    /// Look up a cookie by name
    fn get_cookie(&self, name: &str) -> ScopeResult<Option<BrowserCookie>>;

    /// Delete a cookie by name
    fn delete_cookie(&mut self, name: &str) -> ScopeResult<()>;

    /// Add a cookie
    fn add_cookie(&mut self, cookie: BrowserCookie) -> ScopeResult<()>;
}

/// Push cookies into a browser session.
///
/// Entries without a value are skipped. A cookie already present under the
/// same name is deleted before the new one is added. Returns how many
/// cookies were written.
///
/// # Errors
///
/// Propagates the first driver failure.
pub fn inject_cookies<I, K, V>(
    sink: &mut dyn CookieSink,
    cookies: I,
    domain: &str,
) -> ScopeResult<usize>
where
    I: IntoIterator<Item = (K, Option<V>)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut written = 0;
    for (name, value) in cookies {
        let Some(value) = value else { continue };
        let name = name.as_ref();
        if name.is_empty() {
            return Err(ScopeError::BrowserCookie {
                message: "cookie name must not be empty".to_string(),
            });
        }

        if sink.get_cookie(name)?.is_some() {
            sink.delete_cookie(name)?;
        }
        sink.add_cookie(BrowserCookie::app_cookie(name, value.as_ref(), domain))?;
        written += 1;
    }
    tracing::debug!(written, domain, "cookies injected into browser");
    Ok(written)
}
