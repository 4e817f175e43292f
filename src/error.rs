use thiserror::Error;

/// Typed failures raised by the detector client and the context guard.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Extension context invalidated")]
    ContextInvalidated,
    #[error("Detector request timed out after {0}ms")]
    Timeout(u64),
    #[error("Detector transport error: {0}")]
    Transport(String),
    #[error("Detector returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Detector rejected request: {0}")]
    Api(String),
    #[error("Malformed detector response: {0}")]
    Decode(String),
}

impl GuardError {
    /// Whether another attempt at the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GuardError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            GuardError::Decode(error.to_string())
        } else {
            GuardError::Transport(error.to_string())
        }
    }
}

pub type GuardResult<T> = Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GuardError::Timeout(30_000).is_retryable());
        assert!(GuardError::Transport("reset".into()).is_retryable());
        assert!(GuardError::Http {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!GuardError::Http {
            status: 401,
            message: "unauthorized".into()
        }
        .is_retryable());
        assert!(!GuardError::Api("quota".into()).is_retryable());
    }

    #[test]
    fn test_context_message_matches_wire_error() {
        assert_eq!(
            GuardError::ContextInvalidated.to_string(),
            "Extension context invalidated"
        );
    }
}
