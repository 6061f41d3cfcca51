use config::InvocationConfig;
use errors::ErrorKind;
use std::time::Duration;

/// Delay schedule between attempts of one invocation.
///
/// The delay before retry `n` (1-based, so retry 1 precedes attempt 2) is
/// `base * 2^(n-1) * m(kind) + jitter`, capped at `max_delay`, where `m` is
/// the rate-limit multiplier for quota errors, the network multiplier for
/// network failures and timeouts, and 1 otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_multiplier: f64,
    pub network_multiplier: f64,
    pub max_jitter: Duration
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&InvocationConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &InvocationConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            rate_limit_multiplier: config.rate_limit_multiplier,
            network_multiplier: config.network_multiplier,
            max_jitter: Duration::from_millis(config.jitter_ms)
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    pub fn multiplier(&self, kind: ErrorKind) -> f64 {
        if kind.is_rate_limit() {
            self.rate_limit_multiplier
        } else if kind.is_network() {
            self.network_multiplier
        } else {
            1.0
        }
    }

    /// Schedule value before jitter and before the monotonic clamp.
    pub fn raw_delay(&self, retry: u32, kind: ErrorKind) -> Duration {
        let exponent = retry.saturating_sub(1).min(30);
        let factor = f64::from(1u32 << exponent) * self.multiplier(kind);
        let millis = self.base_delay.as_millis() as f64 * factor;
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Delay before retry `retry`.
    ///
    /// Never shorter than `previous` or a provider `retry_after`, never
    /// longer than `max_delay`.
    pub fn delay(
        &self,
        retry: u32,
        kind: ErrorKind,
        previous: Duration,
        retry_after: Option<Duration>
    ) -> Duration {
        let mut delay = self.raw_delay(retry, kind) + self.jitter();
        if let Some(hint) = retry_after {
            delay = delay.max(hint);
        }
        delay.max(previous).min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        self.max_jitter.mul_f64(rand::random::<f64>())
    }
}
