//! A `reqwest` wrapper with retry, response validation and circuit
//! breaking.
//!
//! Retries apply to server errors only, with exponential backoff plus a
//! small jitter. Checksum failures are fatal security errors and are
//! never retried.

use std::time::{Duration, SystemTime};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::Error as PmError;

use super::circuit::CircuitBreaker;

const DEFAULT_USER_AGENT: &str = "keel/0.1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP {status} is not an accepted response code for {url}")]
    UnacceptedStatus { status: u16, url: String },

    #[error("response for {url} exceeds the {limit}-byte limit")]
    ResponseTooLarge { limit: u64, url: String },

    #[error("{host} is temporarily cut off after repeated server errors")]
    CircuitOpen { host: String },

    #[error("Max retries exceeded for {url}")]
    MaxRetries { url: String },

    #[error("JSON deserialization error: {0}")]
    JsonParse(String),
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// When set, only these status codes count as success
    pub valid_status: Option<Vec<u16>>,
    pub max_response_size: Option<u64>,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            valid_status: None,
            max_response_size: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_valid_status(mut self, valid_status: Vec<u16>) -> Self {
        self.valid_status = Some(valid_status);
        self
    }

    pub fn with_max_response_size(mut self, max_response_size: u64) -> Self {
        self.max_response_size = Some(max_response_size);
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// GET with retries on server errors.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, HttpError> {
        let host = host_of(url);
        let breaker = CircuitBreaker::shared();
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if let Some(host) = &host {
                if !breaker.admits(host) {
                    return Err(HttpError::CircuitOpen { host: host.clone() });
                }
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if let Some(valid) = &self.config.valid_status {
                        if !valid.contains(&status.as_u16()) {
                            return Err(HttpError::UnacceptedStatus {
                                status: status.as_u16(),
                                url: url.to_string(),
                            });
                        }
                        if let Some(host) = &host {
                            breaker.record_success(host);
                        }
                        return Ok(response);
                    }
                    if status.is_success() {
                        if let Some(host) = &host {
                            breaker.record_success(host);
                        }
                        return Ok(response);
                    }
                    if status.is_server_error() {
                        // Only 5xx responses are retried
                        if let Some(host) = &host {
                            breaker.record_failure(host);
                        }
                        last_error = Some(HttpError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    } else {
                        return Err(HttpError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                }
                Err(e) => return Err(HttpError::Request(e)),
            }

            if attempt < self.config.max_retries {
                tokio::time::sleep(retry_delay(self.config.retry_delay, attempt)).await;
            }
        }

        Err(last_error.unwrap_or(HttpError::MaxRetries {
            url: url.to_string(),
        }))
    }

    /// GET and deserialize a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let bytes = self.download_bytes(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| HttpError::JsonParse(e.to_string()))
    }

    /// GET into memory, enforcing the response-size limit.
    pub async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        let response = self.get(url).await?;

        if let Some(limit) = self.config.max_response_size {
            if let Some(length) = response.content_length() {
                if length > limit {
                    return Err(HttpError::ResponseTooLarge {
                        limit,
                        url: url.to_string(),
                    });
                }
            }
        }

        let bytes = response.bytes().await?;
        if let Some(limit) = self.config.max_response_size {
            if bytes.len() as u64 > limit {
                return Err(HttpError::ResponseTooLarge {
                    limit,
                    url: url.to_string(),
                });
            }
        }
        Ok(bytes.to_vec())
    }
}

/// `base * 2^attempt` plus 1..=10ms of jitter.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base * 2_u32.saturating_pow(attempt) + jitter()
}

fn jitter() -> Duration {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    Duration::from_millis(u64::from(nanos % 10) + 1)
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    let authority = rest.split('/').next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Validate a downloaded artifact against its expected SHA-256 checksum.
///
/// A mismatch is a fatal security error and must not be retried. When the
/// artifact was pinned with a different checksum than the registry now
/// reports, the pinned-side mismatch is reported instead.
pub fn validate_checksum(
    name: &str,
    bytes: &[u8],
    expected: &str,
    pinned: Option<&str>,
) -> Result<(), PmError> {
    if let Some(pinned) = pinned {
        if !pinned.eq_ignore_ascii_case(expected) {
            return Err(PmError::ArtifactChecksumChanged(name.to_string()));
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let actual = format!("{:x}", hasher.finalize());
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(PmError::ArtifactInvalidChecksum(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = HttpClientConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_max_retries(5)
            .with_valid_status(vec![200, 304])
            .with_max_response_size(1024)
            .with_user_agent("Test/1.0".to_string());

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.valid_status, Some(vec![200, 304]));
        assert_eq!(config.max_response_size, Some(1024));
        assert_eq!(config.user_agent, "Test/1.0");
    }

    #[test]
    fn test_retry_delay_doubles_with_jitter() {
        let base = Duration::from_millis(100);

        for attempt in 0..4 {
            let expected = base * 2_u32.pow(attempt);
            let delay = retry_delay(base, attempt);
            assert!(delay > expected, "jitter must be at least 1ms");
            assert!(
                delay <= expected + Duration::from_millis(10),
                "jitter is capped at 10ms"
            );
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(StatusCode::INTERNAL_SERVER_ERROR.is_server_error());
        assert!(StatusCode::BAD_GATEWAY.is_server_error());
        // Client errors are terminal, including rate limits
        assert!(!StatusCode::TOO_MANY_REQUESTS.is_server_error());
        assert!(!StatusCode::NOT_FOUND.is_server_error());
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://repo.example.com/packages/foo"),
            Some("repo.example.com".to_string())
        );
        assert_eq!(
            host_of("https://user:pw@repo.example.com:8443/x"),
            Some("repo.example.com".to_string())
        );
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_validate_checksum_accepts_match() {
        let bytes = b"artifact-bytes";
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = format!("{:x}", hasher.finalize());

        assert!(validate_checksum("foo", bytes, &digest, None).is_ok());
        assert!(validate_checksum("foo", bytes, &digest.to_uppercase(), Some(&digest)).is_ok());
    }

    #[test]
    fn test_validate_checksum_rejects_mismatch() {
        let err = validate_checksum("foo", b"artifact-bytes", "00", None).unwrap_err();
        assert!(matches!(err, PmError::ArtifactInvalidChecksum(_)));
    }

    #[test]
    fn test_validate_checksum_detects_changed_pin() {
        let err = validate_checksum("foo", b"bytes", "aa", Some("bb")).unwrap_err();
        assert!(matches!(err, PmError::ArtifactChecksumChanged(_)));
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpClient::new().unwrap();
        assert_eq!(client.max_retries(), DEFAULT_MAX_RETRIES);
    }
}
