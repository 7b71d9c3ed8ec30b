pub mod breaker;
pub mod rate_limit;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreakers};
pub use rate_limit::{MemoryRateStore, RateLimitConfig, RateStore, RateWindow, RedisRateStore};
pub use retry::{RetryExecutor, RetryPolicy};

use rand::Rng;

/// Injectable random source.
///
/// Backoff jitter and convergence constraint relaxation both draw from this,
/// so tests can pin a deterministic sequence.
pub trait RandomSource: Send + Sync {
    /// Uniform sample in [0, 1).
    fn sample(&self) -> f64;
}

/// Default source backed by the thread-local generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::RandomSource;
    use std::sync::Mutex;

    /// Replays a fixed sequence of samples, cycling when exhausted.
    pub struct FixedRandom {
        samples: Vec<f64>,
        cursor: Mutex<usize>,
    }

    impl FixedRandom {
        pub fn new(samples: Vec<f64>) -> Self {
            Self {
                samples,
                cursor: Mutex::new(0),
            }
        }
    }

    impl RandomSource for FixedRandom {
        fn sample(&self) -> f64 {
            let mut cursor = self.cursor.lock().unwrap();
            let value = self.samples[*cursor % self.samples.len()];
            *cursor += 1;
            value
        }
    }
}
