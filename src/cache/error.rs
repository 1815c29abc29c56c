use thiserror::Error;

/// Failures surfaced by the token cache and its fetchers.
///
/// The type is `Clone` because a single in-flight fetch result is handed
/// to every caller that attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Network or server-side failure; eligible for backoff retry.
    #[error("token fetch failed (status: {status:?}): {message}")]
    RetryableFetch {
        status: Option<u16>,
        message: String,
    },

    /// 4xx response from the authentication backend; never retried.
    #[error("token fetch rejected with status {status}: {message}")]
    ClientFetch { status: u16, message: String },

    /// Any call made after the cache has been destroyed.
    #[error("token service destroyed")]
    ServiceDestroyed,

    /// The backend answered, but with something that is not a usable token.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// A template or organization id that cannot be encoded into a cache key.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TokenError {
    /// Classifies a failed HTTP response by its status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            TokenError::ClientFetch { status, message }
        } else {
            TokenError::RetryableFetch {
                status: Some(status),
                message,
            }
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        TokenError::RetryableFetch {
            status: None,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TokenError::RetryableFetch { status, .. } => *status,
            TokenError::ClientFetch { status, .. } => Some(*status),
            TokenError::ServiceDestroyed
            | TokenError::InvalidToken(_)
            | TokenError::InvalidRequest(_) => None,
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::RetryableFetch { .. } => "retryable",
            TokenError::ClientFetch { .. } => "client",
            TokenError::ServiceDestroyed => "destroyed",
            TokenError::InvalidToken(_) => "invalid_token",
            TokenError::InvalidRequest(_) => "invalid_request",
        }
    }
}
