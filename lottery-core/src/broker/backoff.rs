use std::time::Duration;

/// Geometric retry schedule: `base * multiplier^attempt`.
///
/// Stateless and deterministic. With `multiplier > 1` and a non-zero base
/// the delays are strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, multiplier: f64) -> Self {
        Self { base, multiplier }
    }

    /// Delay to wait after the failed attempt with index `attempt` (0-based).
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let seconds = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 1.5)
    }
}
