//! The `/numbers` request handler.

use crate::aggregate::Aggregator;
use crate::errors::AggregatorError;
use crate::metrics_defs::REQUEST_DURATION;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use shared::http::make_json_response;
use std::time::Duration;
use tokio::time::Instant;

pub type HandlerBody = BoxBody<Bytes, AggregatorError>;

/// Query parameter carrying upstream URLs. May be repeated.
pub const UPSTREAM_PARAM: &str = "u";

/// Body returned when the deadline fires before aggregation completes.
pub const FALLBACK_BODY: &str = r#"{"numbers":[]}"#;

#[derive(Serialize, Debug)]
struct NumbersResponse {
    numbers: Vec<i64>,
}

/// How a request ended, used to tag the duration metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Complete,
    Timeout,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Complete => "complete",
            Outcome::Timeout => "timeout",
        }
    }
}

/// Extracts upstream URLs from a raw query string.
///
/// Returns `None` if the parameter is absent or its first value is empty; the
/// request is then answered as if no upstream was given.
pub fn parse_upstream_urls(query: Option<&str>) -> Option<Vec<String>> {
    let query = query?;

    let urls: Vec<String> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key == UPSTREAM_PARAM)
        .map(|(_, value)| value.into_owned())
        .collect();

    match urls.first() {
        Some(first) if !first.is_empty() => Some(urls),
        _ => None,
    }
}

/// Answers `/numbers` requests.
///
/// Always responds `200 OK` with a `{"numbers": [...]}` JSON body. Every
/// failure degrades to fewer (or no) numbers.
pub struct NumbersHandler {
    aggregator: Aggregator,
    request_timeout: Duration,
}

impl NumbersHandler {
    pub fn new(aggregator: Aggregator, request_timeout: Duration) -> Self {
        Self {
            aggregator,
            request_timeout,
        }
    }

    /// Handles one request whose URI query is `query`.
    ///
    /// `received_at` starts the request deadline, so time spent before the
    /// handler was invoked counts against it.
    pub async fn handle(
        &self,
        query: Option<&str>,
        received_at: Instant,
    ) -> Response<HandlerBody> {
        let (numbers, outcome) = match parse_upstream_urls(query) {
            Some(urls) => self.aggregate_until_deadline(urls, received_at).await,
            None => {
                tracing::debug!(param = UPSTREAM_PARAM, "Upstream parameter is missing");
                (Some(Vec::new()), Outcome::Complete)
            }
        };

        let response = match numbers {
            Some(numbers) => numbers_response(numbers),
            None => make_json_response(StatusCode::OK, FALLBACK_BODY),
        };

        let elapsed = received_at.elapsed();
        tracing::info!(
            total_duration = ?elapsed,
            outcome = outcome.as_str(),
            "Handled numbers request"
        );
        shared::histogram!(REQUEST_DURATION, "outcome" => outcome.as_str())
            .record(elapsed.as_secs_f64());

        response
    }

    /// Races the aggregation against the request deadline.
    ///
    /// Returns `None` if the deadline fired first. The aggregation is dropped
    /// in that case, aborting its fetches, and whatever it had gathered is
    /// lost. Dropping this future before either arm completes aborts them too.
    async fn aggregate_until_deadline(
        &self,
        urls: Vec<String>,
        received_at: Instant,
    ) -> (Option<Vec<i64>>, Outcome) {
        let upstreams = urls.len();
        let deadline = tokio::time::sleep_until(received_at + self.request_timeout);

        tokio::select! {
            numbers = self.aggregator.aggregate(urls) => (Some(numbers), Outcome::Complete),
            _ = deadline => {
                tracing::warn!(
                    upstreams,
                    timeout = ?self.request_timeout,
                    "Request deadline reached, discarding aggregation"
                );
                (None, Outcome::Timeout)
            }
        }
    }
}

fn numbers_response(numbers: Vec<i64>) -> Response<HandlerBody> {
    match serde_json::to_vec(&NumbersResponse { numbers }) {
        Ok(body) => make_json_response(StatusCode::OK, body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize numbers response");
            make_json_response(StatusCode::OK, FALLBACK_BODY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use crate::fetcher::{Fetch, FetchOutcome, UpstreamFetcher};
    use crate::testutils::{TestUpstream, unreachable_url};
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use hyper::header::{CONTENT_TYPE, HeaderValue};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Answers `slow` after a long delay and everything else at once.
    struct SlowFetcher;

    #[async_trait]
    impl Fetch for SlowFetcher {
        async fn fetch(&self, url: &str) -> FetchOutcome {
            if url == "slow" {
                tokio::time::sleep(Duration::from_secs(5)).await;
                return FetchOutcome::success(url.to_string(), vec![99], Duration::from_secs(5));
            }
            match url.parse::<i64>() {
                Ok(n) => FetchOutcome::success(url.to_string(), vec![n], Duration::ZERO),
                Err(_) => FetchOutcome::failure(
                    url.to_string(),
                    FetchError::UnexpectedStatus(StatusCode::NOT_FOUND),
                    Duration::ZERO,
                ),
            }
        }
    }

    /// Sets its flag once a fetch runs to completion.
    struct CompletionFetcher {
        completed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Fetch for CompletionFetcher {
        async fn fetch(&self, url: &str) -> FetchOutcome {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.completed.store(true, Ordering::SeqCst);
            FetchOutcome::success(url.to_string(), vec![1], Duration::from_millis(300))
        }
    }

    fn handler_with(fetcher: impl Fetch + 'static, timeout: Duration) -> NumbersHandler {
        NumbersHandler::new(Aggregator::new(Arc::new(fetcher)), timeout)
    }

    fn http_handler() -> NumbersHandler {
        let fetcher = UpstreamFetcher::new(Some(Duration::from_secs(2))).unwrap();
        handler_with(fetcher, Duration::from_secs(3))
    }

    async fn body_string(response: Response<HandlerBody>) -> String {
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn query_for(urls: &[&str]) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(urls.iter().map(|u| (UPSTREAM_PARAM, *u)))
            .finish()
    }

    #[test]
    fn test_parse_upstream_urls() {
        assert_eq!(parse_upstream_urls(None), None);
        assert_eq!(parse_upstream_urls(Some("")), None);
        assert_eq!(parse_upstream_urls(Some("x=1")), None);
        assert_eq!(parse_upstream_urls(Some("u=")), None);
        assert_eq!(parse_upstream_urls(Some("u=&u=http://a")), None);

        assert_eq!(
            parse_upstream_urls(Some("u=http://a/primes&x=1&u=http://b/fibo&u=http://a/primes")),
            Some(vec![
                "http://a/primes".to_string(),
                "http://b/fibo".to_string(),
                "http://a/primes".to_string(),
            ])
        );

        // values are percent-decoded
        assert_eq!(
            parse_upstream_urls(Some("u=http%3A%2F%2Fa%2Fn%3Fx%3D1%26y%3D2")),
            Some(vec!["http://a/n?x=1&y=2".to_string()])
        );
    }

    #[tokio::test]
    async fn test_no_param() {
        let response = http_handler().handle(None, Instant::now()).await;
        assert_eq!(body_string(response).await, r#"{"numbers":[]}"#);
    }

    #[tokio::test]
    async fn test_empty_param() {
        let response = http_handler().handle(Some("u="), Instant::now()).await;
        assert_eq!(body_string(response).await, r#"{"numbers":[]}"#);
    }

    #[tokio::test]
    async fn test_merges_upstreams() {
        let primes = TestUpstream::numbers(r#"{"numbers":[1,2,3,5,7]}"#).await;
        let fibo = TestUpstream::numbers(r#"{"numbers":[8,11,13,21,2]}"#).await;

        let query = query_for(&[primes.url(), fibo.url()]);
        let response = http_handler().handle(Some(&query), Instant::now()).await;

        assert_eq!(
            body_string(response).await,
            r#"{"numbers":[1,2,3,5,7,8,11,13,21]}"#
        );
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let unreachable = unreachable_url().await;
        let upstream = TestUpstream::numbers(r#"{"numbers":[4,4,2]}"#).await;

        let query = query_for(&[unreachable.as_str(), upstream.url()]);
        let response = http_handler().handle(Some(&query), Instant::now()).await;

        assert_eq!(body_string(response).await, r#"{"numbers":[2,4]}"#);
    }

    #[tokio::test]
    async fn test_upstream_server_error() {
        let failing = TestUpstream::spawn(StatusCode::INTERNAL_SERVER_ERROR, "oops").await;
        let upstream = TestUpstream::numbers(r#"{"numbers":[3,1]}"#).await;

        let query = query_for(&[failing.url(), upstream.url()]);
        let response = http_handler().handle(Some(&query), Instant::now()).await;

        assert_eq!(body_string(response).await, r#"{"numbers":[1,3]}"#);
        assert_eq!(failing.hits(), 1);
    }

    #[tokio::test]
    async fn test_timeout_returns_fallback() {
        let handler = handler_with(SlowFetcher, Duration::from_millis(100));

        let start = Instant::now();
        let response = handler.handle(Some("u=1&u=slow&u=2"), start).await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(body_string(response).await, FALLBACK_BODY);
    }

    #[tokio::test]
    async fn test_completes_before_deadline() {
        let handler = handler_with(SlowFetcher, Duration::from_millis(500));

        let response = handler.handle(Some("u=3&u=1&u=3&u=x"), Instant::now()).await;

        assert_eq!(body_string(response).await, r#"{"numbers":[1,3]}"#);
    }

    #[tokio::test]
    async fn test_deadline_counts_from_receipt() {
        let handler = handler_with(SlowFetcher, Duration::from_secs(1));
        let received_at = Instant::now() - Duration::from_secs(1);

        let start = Instant::now();
        let response = handler.handle(Some("u=slow"), received_at).await;

        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(body_string(response).await, FALLBACK_BODY);
    }

    #[tokio::test]
    async fn test_dropped_request_aborts_fetches() {
        let completed = Arc::new(AtomicBool::new(false));
        let fetcher = CompletionFetcher {
            completed: completed.clone(),
        };
        let handler = handler_with(fetcher, Duration::from_secs(5));

        let request = handler.handle(Some("u=http://x&u=http://y"), Instant::now());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), request)
                .await
                .is_err()
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!completed.load(Ordering::SeqCst));
    }
}
