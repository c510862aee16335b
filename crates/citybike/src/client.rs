//! HTTP access with bounded, randomized retry.
//!
//! A [`Transport`] performs a single exchange. [`RetryClient`] wraps one and
//! repeats failed exchanges, waiting a random duration between attempts so
//! that many jobs hitting the shared API do not retry in lockstep.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::Rng;
use reqwest::Method;
use thiserror::Error;

/// Attempts made before a request is given up.
pub const MAX_ATTEMPTS: u32 = 5;

/// Lower bound of the wait between two attempts.
pub const MIN_WAIT: Duration = Duration::from_secs(1);

/// Upper bound of the wait between two attempts.
pub const MAX_WAIT: Duration = Duration::from_secs(5);

/// Request timeout used by [`HttpTransport`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failure, timeout or a broken body.
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status {
        status: u16,
        url: String,
        body: Option<String>,
    },

    #[error("transport error: {0}")]
    Other(String),
}

/// One request, one response. Implementations do not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<String, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn request(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<String, TransportError> {
        (**self).request(method, url, params).await
    }
}

/// [`Transport`] backed by a `reqwest` session, which keeps the connection
/// pool for the lifetime of the client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<String, TransportError> {
        let response = self.http.request(method, url).query(params).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok();
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: url.to_owned(),
                body,
            });
        }

        Ok(response.text().await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    /// Pause after every successful response, to stay below a rate limit.
    pub throttle: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            min_wait: MIN_WAIT,
            max_wait: MAX_WAIT,
            throttle: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_wait(mut self, min_wait: Duration, max_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self.max_wait = max_wait;
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Uniformly drawn from `[min_wait, max_wait]`.
    pub fn next_wait(&self) -> Duration {
        if self.max_wait <= self.min_wait {
            return self.min_wait;
        }
        rand::thread_rng().gen_range(self.min_wait..=self.max_wait)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

pub struct RetryClient<T: Transport> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends the request until it succeeds or the policy runs out of
    /// attempts. In the latter case the error of the last attempt is returned.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<String, TransportError> {
        let max_attempts = self.policy.attempts();
        let mut attempt = 1;
        loop {
            log::debug!("{method} {url}: attempt {attempt}/{max_attempts}");
            match self.transport.request(method.clone(), url, params).await {
                Ok(body) => {
                    if let Some(throttle) = self.policy.throttle {
                        log::debug!("throttling for {throttle:?}");
                        tokio::time::sleep(throttle).await;
                    }
                    return Ok(body);
                }
                Err(why) if attempt < max_attempts => {
                    let wait = self.policy.next_wait();
                    log::warn!(
                        "{method} {url}: attempt {attempt}/{max_attempts} failed ({why}), retrying in {wait:?}"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(why) => {
                    log::error!("{method} {url}: giving up after {attempt} attempts: {why}");
                    return Err(why);
                }
            }
        }
    }
}
