//! Bus configuration.

use std::time::Duration;

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;

const ENV_PREFIX: &str = "REACTIVE_TOPICS_";

/// Where a consumer group without committed offsets starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Connection and consumer-loop settings shared by every topic on a bus.
///
/// Immutable once handed to `MessageBus::new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Comma-separated broker endpoints.
    pub bootstrap_servers: String,
    /// Consumer group used when a topic does not name its own.
    pub default_group: String,
    pub client_id: String,
    /// Upper bound on a single poll; also bounds shutdown latency.
    pub poll_timeout_ms: u64,
    /// Pause after a broker error before polling again.
    pub error_backoff_ms: u64,
    pub auto_offset_reset: OffsetReset,
    pub enable_auto_commit: bool,
    pub publish_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            default_group: "reactive-topics".to_string(),
            client_id: "reactive-topics".to_string(),
            poll_timeout_ms: 100,
            error_backoff_ms: 100,
            auto_offset_reset: OffsetReset::Earliest,
            enable_auto_commit: true,
            publish_timeout_ms: 5_000,
        }
    }
}

impl BusConfig {
    /// Create a config for the given servers and default consumer group.
    pub fn new(bootstrap_servers: impl Into<String>, default_group: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            default_group: default_group.into(),
            ..Self::default()
        }
    }

    /// Load from `REACTIVE_TOPICS_*` environment variables layered over the
    /// defaults, then validate.
    ///
    /// Variable names are the field names in upper case, for example
    /// `REACTIVE_TOPICS_ERROR_BACKOFF_MS`. `REACTIVE_TOPICS_GROUP` is
    /// accepted for `default_group`.
    pub fn from_env() -> Result<Self, ConstructionError> {
        Self::figment()
            .merge(
                Env::prefixed(ENV_PREFIX).map(|key| {
                    if key.as_str() == "group" {
                        "default_group".into()
                    } else {
                        key.as_str().to_owned().into()
                    }
                }),
            )
            .extract::<Self>()
            .map_err(|err| ConstructionError::new("environment", err.to_string()))
            .and_then(|config| config.validate().map(|()| config))
    }

    /// Defaults as a figment provider, for layering other sources on top.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    /// Client id reported to the broker by consumers and the producer.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the poll timeout, rounded up to whole milliseconds.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = millis_ceil(timeout);
        self
    }

    /// Set the pause after a broker error, rounded up to whole milliseconds.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff_ms = millis_ceil(backoff);
        self
    }

    /// Where a group with no committed position starts reading.
    pub fn with_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Resolve the group a loop should use for an optional override.
    pub fn group_or_default<'a>(&'a self, group: Option<&'a str>) -> &'a str {
        match group {
            Some(g) if !g.trim().is_empty() => g,
            _ => &self.default_group,
        }
    }

    /// Check the fields the bus cannot run without. The error names the
    /// first offending field.
    pub fn validate(&self) -> Result<(), ConstructionError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConstructionError::new(
                "bootstrap_servers",
                "must not be blank",
            ));
        }
        if self.default_group.trim().is_empty() {
            return Err(ConstructionError::new("default_group", "must not be blank"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConstructionError::new(
                "poll_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn millis_ceil(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}
