//! Pipeline configuration.
//!
//! Every value has a default; `from_env` overrides them from `UPLOADER_*`
//! variables. Handlers receive the pieces they need at construction and never
//! read the environment themselves.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use uploader_core::{DomainError, SourceId};
use uploader_events::{RoutingSources, RoutingTable};

use crate::api::{
    DEFAULT_FAILURE_PATTERN, DEFAULT_REJECT_PATTERN, DEFAULT_TRANSIENT_WINDOW_SECS, OutcomePolicy,
};

/// Upper bound on messages per receive, matching common queue service limits.
pub const MAX_DRAIN_BATCH: usize = 10;

/// Largest accepted value for any `*_SECS` setting (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: expected a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var}: {value} exceeds the maximum of {max} seconds")]
    OutOfRange { var: &'static str, value: u64, max: u64 },

    #[error("{var}: invalid pattern: {source}")]
    InvalidPattern {
        var: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("{var}: {source}")]
    InvalidSource {
        var: &'static str,
        #[source]
        source: DomainError,
    },

    #[error("{var}: must not be empty")]
    Empty { var: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueConfig {
    pub name: String,
    pub visibility_timeout_secs: u64,
    pub retention_secs: u64,
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> chrono::Duration {
        seconds(self.visibility_timeout_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        seconds(self.retention_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainConfig {
    pub period_secs: u64,
    pub budget_secs: u64,
    pub batch_size: usize,
    pub wait_secs: u64,
}

impl DrainConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub inbound_bucket: String,
    /// `None` disables the outbound copy.
    pub outbound_bucket: Option<String>,
    pub copy_prefix: String,
    pub sources: RoutingSources,
    pub failure_pattern: String,
    pub reject_pattern: String,
    pub transient_window_secs: u64,
    pub queue: QueueConfig,
    pub drain: DrainConfig,
    #[serde(skip)]
    pub redis_url: Option<String>,
    pub bind_addr: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inbound_bucket: "inbound".to_string(),
            outbound_bucket: Some("outbound".to_string()),
            copy_prefix: "copied/".to_string(),
            sources: default_sources(),
            failure_pattern: DEFAULT_FAILURE_PATTERN.to_string(),
            reject_pattern: DEFAULT_REJECT_PATTERN.to_string(),
            transient_window_secs: DEFAULT_TRANSIENT_WINDOW_SECS.unsigned_abs(),
            queue: QueueConfig {
                name: "retry-queue".to_string(),
                visibility_timeout_secs: 60,
                retention_secs: 2 * 24 * 60 * 60,
            },
            drain: DrainConfig {
                period_secs: 60,
                budget_secs: 60,
                batch_size: MAX_DRAIN_BATCH,
                wait_secs: 15,
            },
            redis_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

fn default_sources() -> RoutingSources {
    RoutingSources {
        ingestion: SourceId::from_static("uploader.ingestion"),
        invoke_api: SourceId::from_static("uploader.invoke_api"),
        drain: SourceId::from_static("uploader.handle_retries"),
    }
}

impl PipelineConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env { lookup: &lookup };

        let inbound_bucket = env.string_or_warn("UPLOADER_INBOUND_BUCKET", &defaults.inbound_bucket);
        if inbound_bucket.is_empty() {
            return Err(ConfigError::Empty {
                var: "UPLOADER_INBOUND_BUCKET",
            });
        }

        let outbound_bucket = match lookup("UPLOADER_OUTBOUND_BUCKET") {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(raw.trim().to_string()),
            None => {
                warn!(default = ?defaults.outbound_bucket, "UPLOADER_OUTBOUND_BUCKET not set, using default");
                defaults.outbound_bucket.clone()
            }
        };

        let sources = RoutingSources {
            ingestion: env.source("UPLOADER_SOURCE_INGESTION", &defaults.sources.ingestion)?,
            invoke_api: env.source("UPLOADER_SOURCE_INVOKE_API", &defaults.sources.invoke_api)?,
            drain: env.source("UPLOADER_SOURCE_DRAIN", &defaults.sources.drain)?,
        };

        let batch_size = env.number("UPLOADER_DRAIN_BATCH_SIZE", defaults.drain.batch_size as u64)?;

        let config = Self {
            inbound_bucket,
            outbound_bucket,
            copy_prefix: env.string("UPLOADER_COPY_PREFIX", &defaults.copy_prefix),
            sources,
            failure_pattern: env.string("UPLOADER_FAILURE_PATTERN", &defaults.failure_pattern),
            reject_pattern: env.string("UPLOADER_REJECT_PATTERN", &defaults.reject_pattern),
            transient_window_secs: env
                .seconds("UPLOADER_TRANSIENT_WINDOW_SECS", defaults.transient_window_secs)?,
            queue: QueueConfig {
                name: env.string("UPLOADER_QUEUE_NAME", &defaults.queue.name),
                visibility_timeout_secs: env.seconds(
                    "UPLOADER_VISIBILITY_TIMEOUT_SECS",
                    defaults.queue.visibility_timeout_secs,
                )?,
                retention_secs: env.seconds("UPLOADER_RETENTION_SECS", defaults.queue.retention_secs)?,
            },
            drain: DrainConfig {
                period_secs: env.seconds("UPLOADER_DRAIN_PERIOD_SECS", defaults.drain.period_secs)?,
                budget_secs: env.seconds("UPLOADER_DRAIN_BUDGET_SECS", defaults.drain.budget_secs)?,
                batch_size: usize::try_from(batch_size)
                    .unwrap_or(MAX_DRAIN_BATCH)
                    .clamp(1, MAX_DRAIN_BATCH),
                wait_secs: env.seconds("UPLOADER_DRAIN_WAIT_SECS", defaults.drain.wait_secs)?,
            },
            redis_url: lookup("UPLOADER_REDIS_URL").filter(|url| !url.trim().is_empty()),
            bind_addr: env.string_or_warn("UPLOADER_BIND_ADDR", &defaults.bind_addr),
        };

        config.outcome_policy()?;
        Ok(config)
    }

    pub fn outcome_policy(&self) -> Result<OutcomePolicy, ConfigError> {
        if self.transient_window_secs > MAX_DURATION_SECS {
            return Err(ConfigError::OutOfRange {
                var: "UPLOADER_TRANSIENT_WINDOW_SECS",
                value: self.transient_window_secs,
                max: MAX_DURATION_SECS,
            });
        }
        let window = seconds(self.transient_window_secs);
        OutcomePolicy::new(&self.failure_pattern, &self.reject_pattern, window).map_err(|source| {
            let var = match regex::Regex::new(&self.failure_pattern) {
                Ok(_) => "UPLOADER_REJECT_PATTERN",
                Err(_) => "UPLOADER_FAILURE_PATTERN",
            };
            ConfigError::InvalidPattern { var, source }
        })
    }

    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable::standard(&self.sources, Some(&self.inbound_bucket))
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, var: &'static str, default: &str) -> String {
        (self.lookup)(var).unwrap_or_else(|| default.to_string())
    }

    fn string_or_warn(&self, var: &'static str, default: &str) -> String {
        (self.lookup)(var).unwrap_or_else(|| {
            warn!(var, default, "environment variable not set, using default");
            default.to_string()
        })
    }

    fn number(&self, var: &'static str, default: u64) -> Result<u64, ConfigError> {
        match (self.lookup)(var) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
        }
    }

    fn seconds(&self, var: &'static str, default: u64) -> Result<u64, ConfigError> {
        let value = self.number(var, default)?;
        if value > MAX_DURATION_SECS {
            return Err(ConfigError::OutOfRange {
                var,
                value,
                max: MAX_DURATION_SECS,
            });
        }
        Ok(value)
    }

    fn source(&self, var: &'static str, default: &SourceId) -> Result<SourceId, ConfigError> {
        match (self.lookup)(var) {
            None => Ok(default.clone()),
            Some(raw) => SourceId::new(raw).map_err(|source| ConfigError::InvalidSource { var, source }),
        }
    }
}

/// Saturates at [`chrono::Duration::MAX`]; callers add it with `checked_*`.
fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.inbound_bucket, "inbound");
        assert_eq!(config.outbound_bucket.as_deref(), Some("outbound"));
        assert_eq!(config.copy_prefix, "copied/");
        assert_eq!(config.transient_window_secs, 120);
        assert_eq!(config.queue.visibility_timeout_secs, 60);
        assert_eq!(config.queue.retention_secs, 172_800);
        assert_eq!(config.drain.batch_size, 10);
        assert_eq!(config.drain.wait_secs, 15);
        assert_eq!(config.sources.drain.as_str(), "uploader.handle_retries");
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn overrides_and_clamping() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("UPLOADER_INBOUND_BUCKET", "uploads"),
            ("UPLOADER_OUTBOUND_BUCKET", ""),
            ("UPLOADER_DRAIN_BATCH_SIZE", "50"),
            ("UPLOADER_TRANSIENT_WINDOW_SECS", "30"),
            ("UPLOADER_REDIS_URL", "redis://127.0.0.1/"),
        ]))
        .unwrap();

        assert_eq!(config.inbound_bucket, "uploads");
        assert!(config.outbound_bucket.is_none());
        assert_eq!(config.drain.batch_size, 10);
        assert_eq!(config.outcome_policy().unwrap().transient_window().num_seconds(), 30);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1/"));

        let zero = PipelineConfig::from_lookup(lookup(&[("UPLOADER_DRAIN_BATCH_SIZE", "0")])).unwrap();
        assert_eq!(zero.drain.batch_size, 1);
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = PipelineConfig::from_lookup(lookup(&[("UPLOADER_DRAIN_PERIOD_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { var: "UPLOADER_DRAIN_PERIOD_SECS", .. }));

        let err = PipelineConfig::from_lookup(lookup(&[("UPLOADER_REJECT_PATTERN", "(")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { var: "UPLOADER_REJECT_PATTERN", .. }));

        let err = PipelineConfig::from_lookup(lookup(&[("UPLOADER_SOURCE_DRAIN", " ")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSource { .. }));
    }

    #[test]
    fn oversized_durations_are_errors() {
        let err = PipelineConfig::from_lookup(lookup(&[("UPLOADER_TRANSIENT_WINDOW_SECS", "10000000000000000")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { var: "UPLOADER_TRANSIENT_WINDOW_SECS", .. }));

        let err =
            PipelineConfig::from_lookup(lookup(&[("UPLOADER_RETENTION_SECS", "9000000000000000")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { var: "UPLOADER_RETENTION_SECS", .. }));

        let at_max = MAX_DURATION_SECS.to_string();
        let config = PipelineConfig::from_lookup(lookup(&[("UPLOADER_VISIBILITY_TIMEOUT_SECS", at_max.as_str())])).unwrap();
        assert_eq!(config.queue.visibility_timeout().num_seconds(), MAX_DURATION_SECS as i64);

        let direct = PipelineConfig {
            transient_window_secs: u64::MAX,
            ..PipelineConfig::default()
        };
        assert!(matches!(direct.outcome_policy(), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn unrepresentable_durations_saturate() {
        let queue = QueueConfig {
            name: "q".into(),
            visibility_timeout_secs: u64::MAX,
            retention_secs: 9_300_000_000_000_000,
        };
        assert_eq!(queue.visibility_timeout(), chrono::Duration::MAX);
        assert_eq!(queue.retention(), chrono::Duration::MAX);
    }

    #[test]
    fn redis_url_is_not_reported() {
        let mut config = PipelineConfig::default();
        config.redis_url = Some("redis://:secret@host/".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
