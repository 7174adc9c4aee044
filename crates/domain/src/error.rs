/// Shared error type used across all Tutorbench crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        /// Server-provided reset hint, when present.
        retry_after_ms: Option<u64>,
    },

    #[error("parse: {0}")]
    Parse(String),

    #[error("backend {provider}: {message}")]
    Backend { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("store: {0}")]
    Store(String),

    #[error("trial: {0}")]
    Trial(String),

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the transport layer may retry this error.
    ///
    /// Parse errors are never retried at the transport layer; the caller
    /// decides whether a softer fallback applies.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout(_) | Self::RateLimit { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(Error::Http("502".into()).is_retryable());
        assert!(Error::Timeout("deadline".into()).is_retryable());
        assert!(Error::RateLimit {
            message: "429".into(),
            retry_after_ms: Some(1000)
        }
        .is_retryable());
    }

    #[test]
    fn parse_and_cancel_are_not_retryable() {
        assert!(!Error::Parse("bad shape".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Config("missing scenario".into()).is_retryable());
    }
}
