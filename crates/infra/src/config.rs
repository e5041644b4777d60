//! Environment-driven configuration for the ingestion worker.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use filepipe_observability::{LogFormat, LogSettings};

use crate::jobs::{JobQueueConfig, RetryPolicy};
use crate::processing::ProcessorSettings;

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Keys a deployment should set even though the worker can start without them.
const RECOMMENDED_KEYS: &[&str] = &["DATABASE_URL"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub concurrency: usize,
    pub retry_base: Duration,
    pub batch_size: usize,
    pub max_line_bytes: usize,
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub blob_root: PathBuf,
    pub blob_bucket: String,
    pub log: LogSettings,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            database_url: None,
            blob_root: PathBuf::from("./blobs"),
            blob_bucket: "uploads".to_string(),
            log: LogSettings::default(),
        }
    }
}

impl IngestConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset or empty keys take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let retry_ms = positive(&get, "INGEST_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS)?;

        let format = match get("LOG_FORMAT") {
            Some(raw) => raw.parse::<LogFormat>().map_err(|e| ConfigError::Invalid {
                key: "LOG_FORMAT",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.log.format,
        };

        Ok(Self {
            concurrency: positive(&get, "INGEST_CONCURRENCY", defaults.concurrency)?,
            retry_base: Duration::from_millis(retry_ms),
            batch_size: positive(&get, "INGEST_BATCH_SIZE", defaults.batch_size)?,
            max_line_bytes: positive(&get, "INGEST_MAX_LINE_BYTES", defaults.max_line_bytes)?,
            database_url: get("DATABASE_URL"),
            blob_root: get("BLOB_ROOT").map(PathBuf::from).unwrap_or(defaults.blob_root),
            blob_bucket: get("BLOB_BUCKET").unwrap_or(defaults.blob_bucket),
            log: LogSettings {
                level: get("LOG_LEVEL").unwrap_or(defaults.log.level),
                format,
            },
        })
    }

    /// Recommended keys that `lookup` leaves unset.
    pub fn missing_recommended<F>(lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        RECOMMENDED_KEYS
            .iter()
            .copied()
            .filter(|key| lookup(key).is_none_or(|v| v.trim().is_empty()))
            .collect()
    }

    pub fn queue_config(&self) -> JobQueueConfig {
        JobQueueConfig::default()
            .with_name("file-processing")
            .with_concurrency(self.concurrency)
            .with_retry_policy(RetryPolicy::new(self.retry_base))
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            batch_size: self.batch_size,
            max_line_bytes: self.max_line_bytes,
        }
    }
}

fn positive<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let value = raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = IngestConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.retry_base, Duration::from_secs(1));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn values_are_read_from_lookup() {
        let config = IngestConfig::from_lookup(lookup(&[
            ("INGEST_CONCURRENCY", "8"),
            ("INGEST_RETRY_BASE_MS", "250"),
            ("INGEST_BATCH_SIZE", "500"),
            ("DATABASE_URL", "postgres://localhost/filepipe"),
            ("BLOB_ROOT", "/var/lib/blobs"),
            ("BLOB_BUCKET", "incoming"),
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "pretty"),
        ]))
        .unwrap();

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retry_base, Duration::from_millis(250));
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/filepipe"));
        assert_eq!(config.blob_root, PathBuf::from("/var/lib/blobs"));
        assert_eq!(config.blob_bucket, "incoming");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Pretty);

        let queue = config.queue_config();
        assert_eq!(queue.concurrency, 8);
        assert_eq!(queue.retry.delay_for_attempt(1), Duration::from_millis(500));
    }

    #[test]
    fn zero_and_garbage_are_rejected() {
        let err = IngestConfig::from_lookup(lookup(&[("INGEST_CONCURRENCY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "INGEST_CONCURRENCY", .. }));

        let err = IngestConfig::from_lookup(lookup(&[("INGEST_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "INGEST_BATCH_SIZE", .. }));

        let err = IngestConfig::from_lookup(lookup(&[("LOG_FORMAT", "xml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LOG_FORMAT", .. }));
    }

    #[test]
    fn missing_database_url_is_reported() {
        assert_eq!(IngestConfig::missing_recommended(lookup(&[])), vec!["DATABASE_URL"]);
        assert!(
            IngestConfig::missing_recommended(lookup(&[("DATABASE_URL", "postgres://x")]))
                .is_empty()
        );
    }
}
