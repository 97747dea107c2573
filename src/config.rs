use std::time::Duration;

/// Whether a settled payment debits the wallet when its outcome is `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebitPolicy {
    /// Debit on every terminal outcome.
    #[default]
    Always,
    /// Debit only `Completed` payments.
    CompletedOnly,
}

impl DebitPolicy {
    pub fn debits(&self, status: crate::domain::payment::PaymentStatus) -> bool {
        use crate::domain::payment::PaymentStatus;
        match self {
            DebitPolicy::Always => status.is_terminal(),
            DebitPolicy::CompletedOnly => status == PaymentStatus::Completed,
        }
    }
}

pub const DEFAULT_SUCCESS_RATE: f64 = 0.9;

/// Clamps a probability into `[0, 1]`. NaN falls back to the default rate.
pub fn normalize_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        DEFAULT_SUCCESS_RATE
    } else {
        rate.clamp(0.0, 1.0)
    }
}

/// Tunables for the engine and its settlement workers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on waiting for a transaction id lock.
    pub lock_timeout: Duration,
    pub settle_delay_min: Duration,
    pub settle_delay_max: Duration,
    /// Probability in `[0, 1]` that the default gateway completes a payment.
    pub success_rate: f64,
    /// Maximum number of settlements running at once.
    pub settlement_workers: usize,
    pub settlement_max_attempts: u32,
    pub settlement_retry_backoff: Duration,
    pub debit_policy: DebitPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(100),
            settle_delay_min: Duration::from_secs(1),
            settle_delay_max: Duration::from_secs(3),
            success_rate: DEFAULT_SUCCESS_RATE,
            settlement_workers: 16,
            settlement_max_attempts: 3,
            settlement_retry_backoff: Duration::from_millis(200),
            debit_policy: DebitPolicy::Always,
        }
    }
}

impl EngineConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the settlement latency range. Bounds are swapped if given reversed.
    pub fn with_settle_delay(mut self, min: Duration, max: Duration) -> Self {
        self.settle_delay_min = min.min(max);
        self.settle_delay_max = min.max(max);
        self
    }

    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = normalize_rate(rate);
        self
    }

    pub fn with_settlement_workers(mut self, workers: usize) -> Self {
        self.settlement_workers = workers.max(1);
        self
    }

    pub fn with_retries(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.settlement_max_attempts = max_attempts.max(1);
        self.settlement_retry_backoff = backoff;
        self
    }

    pub fn with_debit_policy(mut self, policy: DebitPolicy) -> Self {
        self.debit_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentStatus;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_millis(100));
        assert_eq!(config.settle_delay_min, Duration::from_secs(1));
        assert_eq!(config.settle_delay_max, Duration::from_secs(3));
        assert_eq!(config.debit_policy, DebitPolicy::Always);
    }

    #[test]
    fn test_builder_normalizes_values() {
        let config = EngineConfig::default()
            .with_settle_delay(Duration::from_millis(50), Duration::from_millis(10))
            .with_success_rate(1.5)
            .with_settlement_workers(0)
            .with_retries(0, Duration::ZERO);
        assert_eq!(config.settle_delay_min, Duration::from_millis(10));
        assert_eq!(config.settle_delay_max, Duration::from_millis(50));
        assert_eq!(config.success_rate, 1.0);
        assert_eq!(config.settlement_workers, 1);
        assert_eq!(config.settlement_max_attempts, 1);
    }

    #[test]
    fn test_debit_policy() {
        assert!(DebitPolicy::Always.debits(PaymentStatus::Failed));
        assert!(DebitPolicy::Always.debits(PaymentStatus::Completed));
        assert!(!DebitPolicy::Always.debits(PaymentStatus::Pending));
        assert!(!DebitPolicy::CompletedOnly.debits(PaymentStatus::Failed));
        assert!(DebitPolicy::CompletedOnly.debits(PaymentStatus::Completed));
    }

    #[test]
    fn test_non_finite_success_rate() {
        let config = EngineConfig::default().with_success_rate(f64::NAN);
        assert_eq!(config.success_rate, DEFAULT_SUCCESS_RATE);
        let config = EngineConfig::default().with_success_rate(f64::INFINITY);
        assert_eq!(config.success_rate, 1.0);
        assert_eq!(normalize_rate(f64::NEG_INFINITY), 0.0);
    }
}
