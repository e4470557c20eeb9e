//! GitLab API error types and retry classification.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to a GitLab instance.
#[derive(Debug, Error)]
pub enum ApiError {
    /// API returned an error response not covered by a more specific variant.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limit exceeded; `retry_after` carries the server's hint, if any.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Authentication failed or token lacks permission.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists (e.g. concurrent group creation).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request hit the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Local filesystem failure while staging an archive.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Response body did not parse.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Classify an HTTP status code and response body into a typed error.
    pub fn from_status(status: u16, message: &str, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::Auth(format!("{status}: {message}")),
            404 => Self::NotFound(message.to_string()),
            409 => Self::Conflict(message.to_string()),
            429 => Self::RateLimited { retry_after },
            _ => Self::Api {
                status,
                message: message.to_string(),
            },
        }
    }

    /// Whether retrying this error can possibly succeed.
    ///
    /// Rate limits, timeouts, connection failures and 5xx responses are
    /// transient; everything else fails immediately.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Minimum wait the server asked for before the next attempt.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of the message, which keeps multi-line bodies out of
/// progress output and per-project failure reasons.
#[must_use]
pub fn short_error_message(e: &ApiError) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_classifies() {
        assert!(matches!(
            ApiError::from_status(401, "bad token", None),
            ApiError::Auth(_)
        ));
        assert!(matches!(
            ApiError::from_status(404, "no such group", None),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from_status(409, "path taken", None),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from_status(429, "slow down", Some(Duration::from_secs(7))),
            ApiError::RateLimited {
                retry_after: Some(d)
            } if d == Duration::from_secs(7)
        ));
        assert!(matches!(
            ApiError::from_status(500, "boom", None),
            ApiError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn transient_classification() {
        assert!(
            ApiError::RateLimited { retry_after: None }.is_transient()
        );
        assert!(ApiError::Timeout("deadline".into()).is_transient());
        assert!(ApiError::Network("reset".into()).is_transient());
        assert!(
            ApiError::Api {
                status: 503,
                message: "maintenance".into()
            }
            .is_transient()
        );

        assert!(!ApiError::Auth("denied".into()).is_transient());
        assert!(!ApiError::NotFound("gone".into()).is_transient());
        assert!(!ApiError::Conflict("taken".into()).is_transient());
        assert!(
            !ApiError::Api {
                status: 422,
                message: "unprocessable".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        let hinted = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(hinted.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(ApiError::Timeout("t".into()).retry_after(), None);
    }

    #[test]
    fn short_message_takes_first_line() {
        let err = ApiError::Api {
            status: 500,
            message: "first\nsecond".into(),
        };
        assert_eq!(short_error_message(&err), "API error (500): first");
    }
}
