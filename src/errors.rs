use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyzygyError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(syzygy::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(syzygy::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(syzygy::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    #[diagnostic(code(syzygy::store))]
    Store(#[from] redis::RedisError),

    #[error("HTTP error: {0}")]
    #[diagnostic(code(syzygy::http))]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}")]
    #[diagnostic(code(syzygy::provider))]
    Provider { status: u16, body: String },

    #[error("Bad request: {0}")]
    #[diagnostic(code(syzygy::bad_request))]
    BadRequest(String),

    #[error("Not found")]
    #[diagnostic(code(syzygy::not_found))]
    NotFound,

    #[error("Unauthorized")]
    #[diagnostic(code(syzygy::unauthorized))]
    Unauthorized,

    #[error("{0}")]
    #[diagnostic(code(syzygy::internal))]
    Internal(String),
}

/// Client-side transport error, partitioned the way the poller reports it.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request rejected with client status {0}")]
    Client(u16),

    #[error("request failed with server status {0}")]
    Server(u16),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
