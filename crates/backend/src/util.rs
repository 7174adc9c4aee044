//! Shared utility functions for backend adapters.

use tb_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve an API key from the environment variable named in the provider
/// config. Keys never live in config files.
pub(crate) fn resolve_api_key(env_var: &str) -> Result<String> {
    std::env::var(env_var).map_err(|_| {
        Error::Config(format!(
            "environment variable '{env_var}' not set or not valid UTF-8"
        ))
    })
}

/// Map a non-success HTTP status to the domain error taxonomy.
///
/// 429 surfaces as `RateLimit`, honouring a `retry-after` seconds hint when
/// the server sent one. Everything else is a transport-class `Http` error
/// (the retry layer decides whether to try again).
pub(crate) fn status_error(
    provider: &str,
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> Error {
    if status.as_u16() == 429 {
        Error::RateLimit {
            message: format!("{provider}: HTTP 429 - {body}"),
            retry_after_ms: retry_after.map(|secs| secs * 1000),
        }
    } else if status.is_server_error() {
        Error::Http(format!("{provider}: HTTP {} - {body}", status.as_u16()))
    } else {
        Error::Backend {
            provider: provider.to_owned(),
            message: format!("HTTP {} - {body}", status.as_u16()),
        }
    }
}

/// Read a `retry-after` header as whole seconds, if present and numeric.
pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_var_is_config_error() {
        let err = resolve_api_key("TB_TEST_NONEXISTENT_VAR_9999").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("TB_TEST_NONEXISTENT_VAR_9999"));
    }

    #[test]
    fn env_var_resolves() {
        std::env::set_var("TB_TEST_RESOLVE_KEY_1234", "secret-value");
        assert_eq!(
            resolve_api_key("TB_TEST_RESOLVE_KEY_1234").unwrap(),
            "secret-value"
        );
        std::env::remove_var("TB_TEST_RESOLVE_KEY_1234");
    }

    #[test]
    fn status_429_maps_to_rate_limit_with_hint() {
        let err = status_error(
            "anthropic",
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            Some(3),
            "slow down",
        );
        match err {
            Error::RateLimit { retry_after_ms, .. } => {
                assert_eq!(retry_after_ms, Some(3000));
            }
            other => panic!("expected RateLimit, got {other:?}"),
        }
    }

    #[test]
    fn status_5xx_is_retryable_http() {
        let err = status_error(
            "anthropic",
            reqwest::StatusCode::BAD_GATEWAY,
            None,
            "upstream",
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn status_4xx_is_terminal_backend_error() {
        let err = status_error("anthropic", reqwest::StatusCode::BAD_REQUEST, None, "nope");
        assert!(!err.is_retryable());
        assert!(matches!(err, Error::Backend { .. }));
    }
}
