pub mod aggregate;
pub mod config;
pub mod errors;
pub mod fetcher;
pub mod handler;
pub mod merger;
pub mod metrics_defs;

#[cfg(test)]
mod testutils;

use aggregate::Aggregator;
use errors::AggregatorError;
use fetcher::UpstreamFetcher;
use handler::{HandlerBody, NumbersHandler};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use metrics::Gauge;
use metrics_defs::REQUESTS_INFLIGHT;
use shared::http::{make_error_response, run_http_service};
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;

/// Path the numbers endpoint is served on.
pub const NUMBERS_PATH: &str = "/numbers";

pub async fn run(config: config::Config) -> errors::Result<()> {
    config.validate()?;

    let service = NumbersService::from_config(&config)?;
    run_http_service(&config.listener.host, config.listener.port, service).await
}

/// Routes `/numbers` to the [`NumbersHandler`] and answers 404 elsewhere.
pub struct NumbersService {
    handler: Arc<NumbersHandler>,
}

impl NumbersService {
    pub fn new(handler: NumbersHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub fn from_config(config: &config::Config) -> errors::Result<Self> {
        let fetcher = UpstreamFetcher::new(config.upstream_timeout())?;
        let aggregator = Aggregator::new(Arc::new(fetcher));
        Ok(Self::new(NumbersHandler::new(
            aggregator,
            config.request_timeout(),
        )))
    }
}

impl Service<Request<Incoming>> for NumbersService {
    type Response = Response<HandlerBody>;
    type Error = AggregatorError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let received_at = Instant::now();
        let handler = self.handler.clone();

        Box::pin(async move {
            if req.uri().path() != NUMBERS_PATH {
                tracing::debug!(method = %req.method(), path = %req.uri().path(), "No route matched");
                return Ok(make_error_response(StatusCode::NOT_FOUND));
            }

            let _inflight = InflightGuard::new(shared::gauge!(REQUESTS_INFLIGHT));
            let response = handler.handle(req.uri().query(), received_at).await;

            Ok(response)
        })
    }
}

/// Counts a request as in flight until dropped, including when hyper drops
/// the request future early.
struct InflightGuard {
    gauge: Gauge,
}

impl InflightGuard {
    fn new(gauge: Gauge) -> Self {
        gauge.increment(1.0);
        Self { gauge }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.gauge.decrement(1.0);
    }
}
