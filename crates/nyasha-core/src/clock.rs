use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

/// Timer abstraction used for reconnect waits and typing delays.
///
/// Production code uses [`TokioClock`]; tests inject a clock that records the
/// requested durations and returns immediately.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Uniform random delay in `[min, max)` used to simulate typing latency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypingDelay {
    pub min: Duration,
    pub max: Duration,
}

impl Default for TypingDelay {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(500),
            max: Duration::from_millis(1500),
        }
    }
}

impl TypingDelay {
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..self.max)
    }
}
