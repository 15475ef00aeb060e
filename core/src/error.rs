use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("configured path is invalid: {0}")]
    InvalidPath(String),

    #[error("rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("source error from {service}: {details}")]
    Source { service: String, details: String },

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when a retry with the same inputs could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Io(_))
    }

    /// True when the error cannot be cured without operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Authentication { .. } | Error::InvalidPath(_)
        )
    }
}
