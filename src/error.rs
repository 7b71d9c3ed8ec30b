use std::time::Duration;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Timeout / 5xx-class upstream failure, eligible for retry.
    #[error("Transient dependency error: {0}")]
    Transient(String),

    #[error("Retry budget exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: String },

    /// Circuit breaker is open for the named dependency.
    #[error("Dependency {dependency} is temporarily unavailable")]
    DependencyUnavailable { dependency: String },

    #[error("Upstream credentials expired")]
    AuthExpired,

    #[error("Credential refresh failed: {0}")]
    AuthRefreshFailed(String),

    /// Caller exceeded its sliding-window budget. Carries the wait estimate
    /// to display; the pipeline never retries across the limiter itself.
    #[error("Rate limited, retry in {}s", cooldown.as_secs())]
    RateLimited { cooldown: Duration },

    /// Upstream rejected the parameter set (400/422-class). Not retried.
    #[error("Upstream rejected request: {0}")]
    UpstreamValidation(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    /// The convergence loop never produced a single candidate.
    #[error("Could not build a playlist from the given seed")]
    ConvergenceFailed,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    /// Whether the retry executor may re-attempt the failed call.
    ///
    /// Auth and validation failures are deliberately excluded: they are
    /// handled by the single-shot credential refresh path and the
    /// simplified-parameter fallback respectively, never by generic backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Transient(_) => true,
            AppError::HttpClient(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_transient() {
        assert!(AppError::Transient("gateway timeout".to_string()).is_transient());
    }

    #[test]
    fn test_auth_expired_is_not_transient() {
        assert!(!AppError::AuthExpired.is_transient());
    }

    #[test]
    fn test_validation_is_not_transient() {
        assert!(!AppError::UpstreamValidation("bad seed".to_string()).is_transient());
    }

    #[test]
    fn test_rate_limited_message_carries_cooldown() {
        let err = AppError::RateLimited {
            cooldown: Duration::from_secs(42),
        };
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_dependency_unavailable_names_dependency() {
        let err = AppError::DependencyUnavailable {
            dependency: "spotify".to_string(),
        };
        assert!(err.to_string().contains("spotify"));
    }
}
