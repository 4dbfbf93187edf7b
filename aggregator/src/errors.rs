use http::StatusCode;
use thiserror::Error;

/// Result type alias for aggregator operations
pub type Result<T, E = AggregatorError> = std::result::Result<T, E>;

/// Process-level failures. Nothing in here is ever reported to a client of
/// the numbers endpoint.
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] crate::config::ValidationError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Why a single upstream contributed no numbers.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected status code {0}")]
    UnexpectedStatus(StatusCode),

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Short, low-cardinality name used as a metric tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl(_) => "invalid_url",
            FetchError::Transport(e) if e.is_timeout() => "timeout",
            FetchError::Transport(_) => "transport",
            FetchError::UnexpectedStatus(_) => "status",
            FetchError::Body(_) => "body",
            FetchError::Decode(_) => "decode",
        }
    }
}
