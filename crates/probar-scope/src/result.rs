//! Result and error types for Probar Scope.

use thiserror::Error;

/// Result type for Probar Scope operations
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Errors that can occur in Probar Scope
#[derive(Debug, Error)]
pub enum ScopeError {
    /// A retry was requested with zero attempts
    #[error("Retry count must be positive, got {retries}")]
    InvalidRetryCount {
        /// Requested retry count
        retries: u32,
    },

    /// Cookies were supplied in a shape the session store cannot read
    #[error("Unsupported cookies shape: {message}")]
    UnsupportedCookieShape {
        /// Error message
        message: String,
    },

    /// Test name was empty or otherwise unusable
    #[error("Invalid test name: {message}")]
    InvalidTestName {
        /// Error message
        message: String,
    },

    /// Browser driver rejected a cookie operation
    #[error("Browser cookie operation failed: {message}")]
    BrowserCookie {
        /// Error message
        message: String,
    },

    /// A file could not be fetched from the remote browser container
    #[error("Remote file not found: {message}")]
    RemoteFileNotFound {
        /// Error message
        message: String,
    },

    /// A test video could not be fetched from the remote browser host
    #[error("Remote video not found: {message}")]
    RemoteVideoNotFound {
        /// Error message
        message: String,
    },

    /// Remote browser host error
    #[error("Remote host error: {message}")]
    RemoteHost {
        /// Error message
        message: String,
    },

    /// Issue tracker lookup failed
    #[error("Issue {issue_id} lookup failed: {message}")]
    IssueLookup {
        /// Issue number
        issue_id: u64,
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ScopeError {
    /// Create an unsupported cookie shape error
    #[must_use]
    pub fn unsupported_cookies(message: impl Into<String>) -> Self {
        Self::UnsupportedCookieShape {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a remote file error
    #[must_use]
    pub fn remote_file(message: impl Into<String>) -> Self {
        Self::RemoteFileNotFound {
            message: message.into(),
        }
    }

    /// Create a remote video error
    #[must_use]
    pub fn remote_video(message: impl Into<String>) -> Self {
        Self::RemoteVideoNotFound {
            message: message.into(),
        }
    }

    /// Create a remote host error
    #[must_use]
    pub fn remote_host(message: impl Into<String>) -> Self {
        Self::RemoteHost {
            message: message.into(),
        }
    }

    /// Whether the error is caller misuse rather than an external failure
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::InvalidRetryCount { .. }
                | Self::UnsupportedCookieShape { .. }
                | Self::InvalidTestName { .. }
                | Self::Config { .. }
        )
    }
}
