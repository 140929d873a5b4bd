//! Reachability probing of cloud endpoints.
//!
//! Uses reqwest `HEAD` requests. A 2xx or 3xx answer counts as reachable;
//! redirects are observed, not followed.

use std::future::Future;
use std::time::Duration;

use edgeprov_core::config::ConnectivityConfig;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Connectivity check errors.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("endpoint {endpoint} unreachable after {attempts} attempt(s): {last_error}")]
    Unreachable {
        endpoint: String,
        attempts: u32,
        last_error: String,
    },

    #[error("invalid endpoint URL `{0}`")]
    InvalidUrl(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// Decides whether the cloud is reachable before any device data is touched.
pub trait ReachabilityCheck {
    /// `Ok` only if every endpoint answered within its retry budget.
    fn check_reachable(
        &self,
        endpoints: &[String],
    ) -> impl Future<Output = Result<(), ConnectivityError>> + Send;
}

/// Bounded retry schedule for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub attempt_timeout: Duration,
    /// Linear step: the wait after attempt `n` is `n * backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn from_config(config: &ConnectivityConfig) -> Self {
        Self {
            attempts: config.attempts,
            attempt_timeout: config.attempt_timeout(),
            backoff: config.backoff(),
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Upper bound on the time spent probing one endpoint.
    pub fn worst_case(&self) -> Duration {
        let waits: Duration = (1..self.attempts).map(|n| self.delay_after(n)).sum();
        self.attempt_timeout.saturating_mul(self.attempts) + waits
    }
}

/// HTTP implementation of [`ReachabilityCheck`].
#[derive(Debug)]
pub struct ConnectivityChecker {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl ConnectivityChecker {
    pub fn new(config: &ConnectivityConfig) -> Result<Self, ConnectivityError> {
        Self::with_policy(RetryPolicy::from_config(config))
    }

    pub fn with_policy(policy: RetryPolicy) -> Result<Self, ConnectivityError> {
        // reqwest is built with rustls-no-provider; Err only means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .connect_timeout(policy.attempt_timeout)
            .timeout(policy.attempt_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConnectivityError::Client(e.to_string()))?;
        Ok(Self { http, policy })
    }

    async fn probe_once(&self, url: &Url) -> Result<StatusCode, String> {
        let resp = self
            .http
            .head(url.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if status.is_success() || status.is_redirection() {
            Ok(status)
        } else {
            Err(format!("HTTP {status}"))
        }
    }

    async fn probe_endpoint(&self, url: &Url) -> Result<(), ConnectivityError> {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.policy.attempt_timeout, self.probe_once(url)).await {
                Ok(Ok(status)) => {
                    debug!(endpoint = %url, %status, attempt, "Endpoint reachable");
                    return Ok(());
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.policy.attempt_timeout);
                }
            }
            warn!(endpoint = %url, attempt, error = %last_error, "Endpoint probe failed");
            if attempt < attempts {
                tokio::time::sleep(self.policy.delay_after(attempt)).await;
            }
        }

        Err(ConnectivityError::Unreachable {
            endpoint: url.to_string(),
            attempts,
            last_error,
        })
    }
}

impl ReachabilityCheck for ConnectivityChecker {
    async fn check_reachable(&self, endpoints: &[String]) -> Result<(), ConnectivityError> {
        let urls = parse_endpoints(endpoints)?;
        debug!(
            endpoints = urls.len(),
            budget_per_endpoint = ?self.policy.worst_case(),
            "Probing cloud endpoints"
        );
        for url in &urls {
            self.probe_endpoint(url).await?;
        }
        info!(endpoints = urls.len(), "All cloud endpoints reachable");
        Ok(())
    }
}

/// Parse configured endpoints; only `http` and `https` URLs are accepted.
pub fn parse_endpoints(endpoints: &[String]) -> Result<Vec<Url>, ConnectivityError> {
    if endpoints.is_empty() {
        return Err(ConnectivityError::InvalidUrl("<no endpoints configured>".into()));
    }
    endpoints
        .iter()
        .map(|raw| match Url::parse(raw.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(url),
            _ => Err(ConnectivityError::InvalidUrl(raw.clone())),
        })
        .collect()
}
