//! Remote Browser Artifacts
//!
//! Downloads files and session videos from a remote browser host. Both appear
//! with a lag (the browser is still writing the download, the recorder is still
//! encoding), so reads go through [`retry`] with per-artifact policies.

use crate::config::ArtifactConfig;
use crate::result::{ScopeError, ScopeResult};
use crate::retry::{retry, RetryPolicy};

/// HTTP status of a successful artifact request
pub const STATUS_OK: u16 = 200;

/// Raw reply from the remote browser host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

impl ArtifactResponse {
    /// 200 reply with `body`
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: STATUS_OK,
            body: body.into(),
        }
    }

    /// Empty reply with `status`
    #[must_use]
    pub const fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    /// Whether the request succeeded
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Transport to the remote browser host
pub trait ArtifactClient: Send + Sync {
    /// Request a file from the browser container of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns a transport error; HTTP failures come back as a status.
    fn get_file(&self, session_id: &str, file_name: &str) -> ScopeResult<ArtifactResponse>;

    /// Delete a file from the browser container of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns a transport error; HTTP failures come back as a status.
    fn delete_file(&self, session_id: &str, file_name: &str) -> ScopeResult<ArtifactResponse>;

    /// Request a recorded video.
    ///
    /// # Errors
    ///
    /// Returns a transport error; HTTP failures come back as a status.
    fn get_video(&self, video_id: &str) -> ScopeResult<ArtifactResponse>;
}

/// Reads artifacts with retries
#[derive(Debug, Clone)]
pub struct ArtifactFetcher<C> {
    client: C,
    file_policy: RetryPolicy,
    video_policy: RetryPolicy,
}

impl<C: ArtifactClient> ArtifactFetcher<C> {
    /// Create a fetcher with explicit policies
    #[must_use]
    pub const fn new(client: C, file_policy: RetryPolicy, video_policy: RetryPolicy) -> Self {
        Self {
            client,
            file_policy,
            video_policy,
        }
    }

    /// Create a fetcher with the configured policies.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured policy is invalid.
    pub fn from_config(client: C, config: &ArtifactConfig) -> ScopeResult<Self> {
        Ok(Self::new(
            client,
            config.file.to_policy()?,
            config.video.to_policy()?,
        ))
    }

    /// Underlying client
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Download `file_name` from the browser container of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::RemoteFileNotFound`] when every attempt failed.
    pub fn get_file(&self, session_id: &str, file_name: &str) -> ScopeResult<Vec<u8>> {
        let attempts = self.file_policy.attempts();
        retry(
            &self.file_policy,
            || {
                let response = self.client.get_file(session_id, file_name)?;
                if response.is_ok() {
                    return Ok(response.body);
                }
                Err(ScopeError::remote_file(format!(
                    "Not found file by file name = {file_name}. Response code: {}",
                    response.status
                )))
            },
            |last| {
                tracing::warn!(session_id, file_name, error = %last, "file download gave up");
                ScopeError::remote_file(format!(
                    "Unable to download file by file name = [{file_name}] after {attempts} retries"
                ))
            },
        )
    }

    /// Delete `file_name` from the browser container of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::RemoteFileNotFound`] unless the host answers 200.
    pub fn delete_file(&self, session_id: &str, file_name: &str) -> ScopeResult<()> {
        let response = self.client.delete_file(session_id, file_name)?;
        if response.is_ok() {
            tracing::debug!(session_id, file_name, "remote file deleted");
            Ok(())
        } else {
            Err(ScopeError::remote_file(format!(
                "Unable to delete file by name = [{file_name}]"
            )))
        }
    }

    /// Download the video recorded as `video_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::RemoteVideoNotFound`] when every attempt failed.
    pub fn get_video(&self, video_id: &str) -> ScopeResult<Vec<u8>> {
        let attempts = self.video_policy.attempts();
        retry(
            &self.video_policy,
            || {
                let response = self.client.get_video(video_id)?;
                if response.is_ok() {
                    return Ok(response.body);
                }
                Err(ScopeError::remote_host(format!(
                    "Not found video by video_id = {video_id}. Response code: {}",
                    response.status
                )))
            },
            |last| {
                tracing::warn!(video_id, error = %last, "video download gave up");
                ScopeError::remote_video(format!(
                    "Unable to download video by id = [{video_id}] after {attempts} retries"
                ))
            },
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::num::NonZeroU32;
    use std::sync::Mutex;

    /// Replays queued responses, then keeps answering 404
    #[derive(Debug, Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<ScopeResult<ArtifactResponse>>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn with_replies(replies: Vec<ScopeResult<ArtifactResponse>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::default(),
            }
        }

        fn next(&self, request: String) -> ScopeResult<ArtifactResponse> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ArtifactResponse::status(404)))
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl ArtifactClient for ScriptedClient {
        fn get_file(&self, session_id: &str, file_name: &str) -> ScopeResult<ArtifactResponse> {
            self.next(format!("GET /download/{session_id}/{file_name}"))
        }

        fn delete_file(&self, session_id: &str, file_name: &str) -> ScopeResult<ArtifactResponse> {
            self.next(format!("DELETE /download/{session_id}/{file_name}"))
        }

        fn get_video(&self, video_id: &str) -> ScopeResult<ArtifactResponse> {
            self.next(format!("GET /video/{video_id}.mp4"))
        }
    }

    fn fetcher(replies: Vec<ScopeResult<ArtifactResponse>>) -> ArtifactFetcher<ScriptedClient> {
        let three = NonZeroU32::new(3).unwrap();
        ArtifactFetcher::new(
            ScriptedClient::with_replies(replies),
            RetryPolicy::immediate(three),
            RetryPolicy::immediate(three),
        )
    }

    mod file_tests {
        use super::*;

        #[test]
        fn test_file_appears_on_second_attempt() {
            let fetcher = fetcher(vec![
                Ok(ArtifactResponse::status(404)),
                Ok(ArtifactResponse::ok(b"report".to_vec())),
            ]);

            let bytes = fetcher.get_file("s1", "report.csv").unwrap();

            assert_eq!(bytes, b"report");
            assert_eq!(fetcher.client().request_count(), 2);
        }

        #[test]
        fn test_file_never_appears() {
            let fetcher = fetcher(vec![]);

            let err = fetcher.get_file("s1", "file.txt").unwrap_err();

            assert_eq!(
                err.to_string(),
                "Remote file not found: Unable to download file by file name = [file.txt] after 3 retries"
            );
            assert_eq!(fetcher.client().request_count(), 3);
        }

        #[test]
        fn test_transport_errors_are_retried() {
            let fetcher = fetcher(vec![
                Err(ScopeError::remote_host("connection reset")),
                Ok(ArtifactResponse::ok(b"x".to_vec())),
            ]);
            assert_eq!(fetcher.get_file("s1", "x.bin").unwrap(), b"x");
        }

        #[test]
        fn test_delete_file() {
            let fetcher = fetcher(vec![
                Ok(ArtifactResponse::ok(Vec::new())),
                Ok(ArtifactResponse::status(500)),
            ]);

            fetcher.delete_file("s1", "a.txt").unwrap();
            let err = fetcher.delete_file("s1", "a.txt").unwrap_err();

            assert!(matches!(err, ScopeError::RemoteFileNotFound { .. }));
            assert_eq!(fetcher.client().request_count(), 2);
        }
    }

    mod video_tests {
        use super::*;

        #[test]
        fn test_video_download() {
            let fetcher = fetcher(vec![Ok(ArtifactResponse::ok(b"mp4".to_vec()))]);
            assert_eq!(fetcher.get_video("test_login").unwrap(), b"mp4");
            assert_eq!(
                *fetcher.client().requests.lock().unwrap(),
                vec!["GET /video/test_login.mp4".to_string()]
            );
        }

        #[test]
        fn test_video_never_ready() {
            let fetcher = fetcher(vec![]);
            let err = fetcher.get_video("v1").unwrap_err();
            assert!(matches!(err, ScopeError::RemoteVideoNotFound { .. }));
            assert_eq!(fetcher.client().request_count(), 3);
        }
    }

    #[test]
    fn test_from_config_uses_configured_policies() {
        let config = ArtifactConfig::default();
        let fetcher = ArtifactFetcher::from_config(ScriptedClient::default(), &config).unwrap();
        assert_eq!(fetcher.file_policy.attempts(), 5);
        assert_eq!(fetcher.video_policy.delay(), std::time::Duration::from_secs(2));
    }
}
