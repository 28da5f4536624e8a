use tokio::time;

/// An exponential backoff with a bounded number of attempts.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Backoff {
    /// The delay after the first failed attempt.
    pub initial: time::Duration,

    /// Scales the delay after each subsequent failed attempt.
    pub factor: f64,

    /// The maximum number of attempts.
    pub steps: u32,
}

// === impl Backoff ===

impl Backoff {
    pub const fn new(initial: time::Duration, factor: f64, steps: u32) -> Self {
        Self {
            initial,
            factor,
            steps,
        }
    }

    /// Calls `check` until it yields a value, sleeping between attempts.
    ///
    /// Returns `None` once all attempts are exhausted. No sleep follows the
    /// final attempt.
    pub async fn retry<T>(&self, mut check: impl FnMut() -> Option<T>) -> Option<T> {
        let mut delay = self.initial;
        for attempt in 1..=self.steps {
            if let Some(value) = check() {
                return Some(value);
            }
            if attempt == self.steps {
                break;
            }
            time::sleep(delay).await;
            delay = delay.mul_f64(self.factor);
        }
        None
    }
}
