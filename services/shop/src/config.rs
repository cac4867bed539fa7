//! Configuration management for a shop service node.
//!
//! Loads configuration from environment variables with sensible defaults.
//! `SERVICE` is the only required variable.

use crate::node::ServiceRole;
use relay_core::rendezvous::DEFAULT_RESPONSE_TTL;
use relay_runtime::{Backoff, CircuitBreakerConfig, WaiterConfig};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but does not parse
    #[error("Invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Offending value
        value: String,
    },

    /// Waiters would give up after answers may already have expired
    #[error("Waiter deadline {deadline:?} exceeds response TTL {ttl:?}")]
    DeadlineExceedsTtl {
        /// Configured waiter deadline
        deadline: Duration,
        /// Configured response TTL
        ttl: Duration,
    },

    /// The waiter would poll in a busy loop
    #[error("Waiter poll interval must be greater than zero")]
    ZeroPollInterval,
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which service this process runs
    pub role: ServiceRole,
    /// Broker connection
    pub kafka: KafkaConfig,
    /// Rendezvous store connection
    pub redis: RedisConfig,
    /// Breaker, waiter and consumer loop tuning
    pub relay: RelayConfig,
    /// Prometheus listener; metrics are not exported when `None`
    pub metrics_addr: Option<SocketAddr>,
}

/// Kafka-protocol broker configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Producer acknowledgements (`0`, `1`, `all`)
    pub acks: String,
    /// Where new consumer groups start (`earliest`, `latest`)
    pub offset_reset: String,
}

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
}

/// Request/reply tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Consecutive failures that open a breaker
    pub breaker_failure_threshold: u32,
    /// Half-open probe budget
    pub breaker_max_requests: u32,
    /// Closed-state count reset window
    pub breaker_interval: Duration,
    /// Open-state cooldown
    pub breaker_timeout: Duration,
    /// Delay between rendezvous polls
    pub poll_interval: Duration,
    /// How long a caller waits for an answer
    pub deadline: Duration,
    /// How long a stored answer lives
    pub response_ttl: Duration,
    /// First consumer loop retry delay
    pub backoff_initial: Duration,
    /// Largest consumer loop retry delay
    pub backoff_max: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let waiter = WaiterConfig::default();
        let backoff = Backoff::default();
        Self {
            breaker_failure_threshold: 5,
            breaker_max_requests: 5,
            breaker_interval: Duration::from_secs(30),
            breaker_timeout: Duration::from_secs(5),
            poll_interval: waiter.poll_interval,
            deadline: waiter.deadline,
            response_ttl: DEFAULT_RESPONSE_TTL,
            backoff_initial: backoff.initial_delay,
            backoff_max: backoff.max_delay,
        }
    }
}

impl RelayConfig {
    /// Breaker settings under `name`.
    #[must_use]
    pub fn breaker(&self, name: impl Into<String>) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .name(name)
            .failure_threshold(self.breaker_failure_threshold)
            .max_requests(self.breaker_max_requests)
            .interval(self.breaker_interval)
            .timeout(self.breaker_timeout)
            .build()
    }

    /// Waiter settings.
    #[must_use]
    pub fn waiter(&self) -> WaiterConfig {
        WaiterConfig::default()
            .with_poll_interval(self.poll_interval)
            .with_deadline(self.deadline)
    }

    /// Consumer loop backoff.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::builder()
            .initial_delay(self.backoff_initial)
            .max_delay(self.backoff_max)
            .multiplier(2)
            .build()
    }

    /// Check the waiter/TTL relationship.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroPollInterval`] or [`ConfigError::DeadlineExceedsTtl`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.deadline > self.response_ttl {
            return Err(ConfigError::DeadlineExceedsTtl {
                deadline: self.deadline,
                ttl: self.response_ttl,
            });
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from the process environment (after `.env`, if any).
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if `SERVICE` is missing or a variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// As [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = RelayConfig::default();

        Ok(Self {
            role: vars
                .parsed::<ServiceRole>("SERVICE")?
                .ok_or(ConfigError::Missing("SERVICE"))?,
            kafka: KafkaConfig {
                brokers: vars.string("KAFKA_BROKER", "localhost:9092"),
                acks: vars.string("KAFKA_ACKS", "all"),
                offset_reset: vars.string("KAFKA_OFFSET_RESET", "earliest"),
            },
            redis: RedisConfig {
                url: vars.string("REDIS_URL", "redis://127.0.0.1:6379"),
            },
            relay: RelayConfig {
                breaker_failure_threshold: vars
                    .parsed("BREAKER_FAILURE_THRESHOLD")?
                    .unwrap_or(defaults.breaker_failure_threshold),
                breaker_max_requests: vars
                    .parsed("BREAKER_MAX_REQUESTS")?
                    .unwrap_or(defaults.breaker_max_requests),
                breaker_interval: vars
                    .secs("BREAKER_INTERVAL_SECS")?
                    .unwrap_or(defaults.breaker_interval),
                breaker_timeout: vars
                    .secs("BREAKER_TIMEOUT_SECS")?
                    .unwrap_or(defaults.breaker_timeout),
                poll_interval: vars
                    .millis("WAITER_POLL_INTERVAL_MS")?
                    .unwrap_or(defaults.poll_interval),
                deadline: vars
                    .millis("WAITER_DEADLINE_MS")?
                    .unwrap_or(defaults.deadline),
                response_ttl: vars
                    .millis("RESPONSE_TTL_MS")?
                    .unwrap_or(defaults.response_ttl),
                backoff_initial: vars
                    .millis("CONSUMER_BACKOFF_INITIAL_MS")?
                    .unwrap_or(defaults.backoff_initial),
                backoff_max: vars
                    .millis("CONSUMER_BACKOFF_MAX_MS")?
                    .unwrap_or(defaults.backoff_max),
            },
            metrics_addr: vars.parsed("METRICS_ADDR")?,
        })
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// See [`RelayConfig::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay.validate()
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    /// `None` when unset or empty, an error when set but unparsable.
    fn parsed<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match (self.0)(key) {
            None => Ok(None),
            Some(value) if value.trim().is_empty() => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn secs(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parsed::<u64>(key)?.map(Duration::from_secs))
    }

    fn millis(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parsed::<u64>(key)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_protocol_constants() {
        let config = load(&[("SERVICE", "product")]).unwrap();

        assert_eq!(config.role, ServiceRole::Product);
        assert_eq!(config.kafka.brokers, "localhost:9092");
        assert_eq!(config.kafka.offset_reset, "earliest");
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(config.relay, RelayConfig::default());
        assert_eq!(config.relay.deadline, Duration::from_secs(5));
        assert_eq!(config.relay.response_ttl, Duration::from_secs(10));
        assert!(config.metrics_addr.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn service_is_required() {
        assert_eq!(load(&[]).err(), Some(ConfigError::Missing("SERVICE")));
        assert!(matches!(
            load(&[("SERVICE", "billing")]),
            Err(ConfigError::Invalid { key: "SERVICE", .. })
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("SERVICE", "cart"),
            ("KAFKA_BROKER", "redpanda:9092"),
            ("BREAKER_FAILURE_THRESHOLD", "3"),
            ("WAITER_DEADLINE_MS", "2500"),
            ("METRICS_ADDR", "0.0.0.0:9090"),
        ])
        .unwrap();

        assert_eq!(config.kafka.brokers, "redpanda:9092");
        assert_eq!(config.relay.breaker_failure_threshold, 3);
        assert_eq!(config.relay.deadline, Duration::from_millis(2500));
        assert_eq!(config.metrics_addr, Some("0.0.0.0:9090".parse().unwrap()));
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        assert_eq!(
            load(&[("SERVICE", "cart"), ("RESPONSE_TTL_MS", "ten")]).err(),
            Some(ConfigError::Invalid {
                key: "RESPONSE_TTL_MS",
                value: "ten".to_string()
            })
        );
    }

    #[test]
    fn deadline_beyond_ttl_is_rejected() {
        let config = load(&[
            ("SERVICE", "store"),
            ("WAITER_DEADLINE_MS", "15000"),
            ("RESPONSE_TTL_MS", "10000"),
        ])
        .unwrap();

        assert_eq!(
            config.validate(),
            Err(ConfigError::DeadlineExceedsTtl {
                deadline: Duration::from_secs(15),
                ttl: Duration::from_secs(10)
            })
        );
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let relay = RelayConfig {
            poll_interval: Duration::ZERO,
            ..RelayConfig::default()
        };
        assert_eq!(relay.validate(), Err(ConfigError::ZeroPollInterval));
    }
}
