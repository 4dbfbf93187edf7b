//! Fetching number lists from a single upstream.

use crate::errors::FetchError;
use crate::metrics_defs::{UPSTREAM_FAILURES, UPSTREAM_REQUEST_DURATION};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};
use url::Url;

/// Body an upstream is expected to answer with.
#[derive(Deserialize, Debug)]
struct NumbersBody {
    #[serde(default)]
    numbers: Vec<i64>,
}

/// Result of fetching one upstream.
///
/// `numbers` is empty whenever `error` is set.
#[derive(Debug)]
pub struct FetchOutcome {
    pub url: String,
    pub numbers: Vec<i64>,
    pub elapsed: Duration,
    pub error: Option<FetchError>,
}

impl FetchOutcome {
    pub fn success(url: String, numbers: Vec<i64>, elapsed: Duration) -> Self {
        Self {
            url,
            numbers,
            elapsed,
            error: None,
        }
    }

    pub fn failure(url: String, error: FetchError, elapsed: Duration) -> Self {
        Self {
            url,
            numbers: Vec::new(),
            elapsed,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Fetches the numbers published by one upstream URL.
///
/// Implementations never fail: every problem is folded into an outcome with
/// no numbers.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

/// [`Fetch`] implementation issuing HTTP GET requests.
#[derive(Clone)]
pub struct UpstreamFetcher {
    client: reqwest::Client,
}

impl UpstreamFetcher {
    /// `timeout` bounds each fetch from connect to the last body byte.
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    async fn fetch_numbers(&self, url: &str) -> Result<Vec<i64>, FetchError> {
        let url = Url::parse(url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::Transport)?;

        // The body is read on every status so the connection is released
        // back to the pool before returning.
        let status = response.status();
        let body = response.bytes().await.map_err(FetchError::Body)?;

        if status != StatusCode::OK {
            return Err(FetchError::UnexpectedStatus(status));
        }

        let decoded: NumbersBody = serde_json::from_slice(&body)?;
        Ok(decoded.numbers)
    }
}

#[async_trait]
impl Fetch for UpstreamFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let start = Instant::now();
        let result = self.fetch_numbers(url).await;
        let elapsed = start.elapsed();

        match result {
            Ok(numbers) => {
                tracing::debug!(url, ?elapsed, ?numbers, "Fetched upstream numbers");
                shared::histogram!(UPSTREAM_REQUEST_DURATION, "status" => "ok")
                    .record(elapsed.as_secs_f64());
                FetchOutcome::success(url.to_string(), numbers, elapsed)
            }
            Err(e) => {
                tracing::warn!(url, ?elapsed, error = %e, "Upstream contributed no numbers");
                shared::histogram!(UPSTREAM_REQUEST_DURATION, "status" => e.kind())
                    .record(elapsed.as_secs_f64());
                shared::counter!(UPSTREAM_FAILURES, "reason" => e.kind()).increment(1);
                FetchOutcome::failure(url.to_string(), e, elapsed)
            }
        }
    }
}
