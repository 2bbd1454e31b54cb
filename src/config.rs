//! Runtime configuration for talking to the account aggregator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The currency assumed when a provider record does not carry one.
pub const DEFAULT_CURRENCY: &str = "INR";

/// Controls how failed provider calls are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// The total number of attempts, including the first call.
    pub max_attempts: u32,
    /// The delay before the first retry. Each subsequent retry doubles the delay.
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
    /// The upper bound on the delay between two attempts.
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries, useful for tests.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// The delay to wait after the attempt numbered `attempt` (starting at 1) failed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Settings shared by the provider gateway, the ingestion pipeline and the webhook ingestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// The base URL of the aggregator's REST API.
    pub base_url: String,
    /// The API key sent as a bearer token to the aggregator.
    pub api_key: String,
    /// The secret shared with the aggregator for signing webhook events.
    pub webhook_secret: String,
    /// The currency code used when a provider record omits it.
    pub default_currency: String,
    /// How transient provider failures are retried.
    pub retry: RetryPolicy,
    /// The upper bound on a single provider call, independent of any outer timeout.
    #[serde(with = "duration_millis")]
    pub call_timeout: Duration,
    /// How many days of history a scheduled fetch asks for.
    pub fetch_window_days: i64,
    /// How long a data session may stay pending before it is given up on, so the link can open
    /// a new one.
    #[serde(with = "duration_millis")]
    pub session_max_age: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            webhook_secret: String::new(),
            default_currency: DEFAULT_CURRENCY.to_owned(),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(10),
            fetch_window_days: 30,
            session_max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{AggregatorConfig, RetryPolicy};

    #[test]
    fn backoff_doubles_until_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(500));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: AggregatorConfig =
            serde_json::from_str(r#"{"webhook_secret": "s3cret", "call_timeout": 2500}"#).unwrap();

        assert_eq!(config.webhook_secret, "s3cret");
        assert_eq!(config.call_timeout, Duration::from_millis(2500));
        assert_eq!(config.default_currency, "INR");
        assert_eq!(config.retry, RetryPolicy::default());
    }
}
