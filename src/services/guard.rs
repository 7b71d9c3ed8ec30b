use std::future::Future;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::resilience::{CircuitBreakers, RetryExecutor};

/// Composes the circuit breaker and retry executor around one upstream call.
///
/// An open breaker fails fast without attempting the call. Otherwise the call
/// runs under bounded-backoff retry, and its final outcome is recorded
/// against the dependency's health: transient-class failures count toward
/// opening the circuit, while auth and validation failures do not — those say
/// nothing about the dependency being down.
pub struct DependencyGuard {
    breakers: Arc<CircuitBreakers>,
    retry: RetryExecutor,
}

impl DependencyGuard {
    pub fn new(breakers: Arc<CircuitBreakers>, retry: RetryExecutor) -> Self {
        Self { breakers, retry }
    }

    pub async fn call<T, F, Fut>(&self, dependency: &str, op: F) -> AppResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if !self.breakers.guard(dependency) {
            tracing::warn!(dependency = %dependency, "Circuit open, failing fast");
            return Err(AppError::DependencyUnavailable {
                dependency: dependency.to_string(),
            });
        }

        match self.retry.run(op).await {
            Ok(value) => {
                self.breakers.record_success(dependency);
                Ok(value)
            }
            Err(e) => {
                if counts_as_dependency_failure(&e) {
                    self.breakers.record_failure(dependency);
                }
                Err(e)
            }
        }
    }
}

fn counts_as_dependency_failure(error: &AppError) -> bool {
    matches!(
        error,
        AppError::Transient(_)
            | AppError::RetryExhausted { .. }
            | AppError::HttpClient(_)
            | AppError::ExternalApi(_)
    )
}
