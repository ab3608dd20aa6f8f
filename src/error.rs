use crate::address::AddressError;
use crate::types::conversions::AmountError;

/// Failure of a single chain API call.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Connection-level failure; safe for the caller to retry.
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out")]
    Timeout,
    /// Only surfaced when throttle recovery itself could not complete.
    #[error("Throttled by gateway (suspended for {suspend_secs}s)")]
    Throttled { suspend_secs: u64 },
    #[error("Malformed response: {0}")]
    Decode(String),
    /// The server answered but reported a logical failure.
    #[error("Server reported failure: {message}")]
    Domain { message: String },
    #[error("Unexpected HTTP status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Amount(#[from] AmountError),
}

impl ChainError {
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::Throttled { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Persistence failure; the caller logs it and drops the unit of work.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ChainError::Timeout.is_retryable());
        assert!(ChainError::Transport("reset".into()).is_retryable());
        assert!(ChainError::Http { status: 502, body: String::new() }.is_retryable());
        assert!(!ChainError::Http { status: 404, body: String::new() }.is_retryable());
        assert!(!ChainError::Decode("eof".into()).is_retryable());
        assert!(!ChainError::domain("REVERT").is_retryable());
        assert!(!ChainError::Cancelled.is_retryable());
    }

    #[test]
    fn json_errors_are_decode_errors() {
        let err: ChainError = serde_json::from_str::<u32>("{").unwrap_err().into();
        assert!(matches!(err, ChainError::Decode(_)));
    }
}
