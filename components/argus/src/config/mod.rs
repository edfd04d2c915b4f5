//! Environment-variable configuration surface (§6). `Config::load` is the
//! only place the process reads environment variables; everything else is
//! handed a parsed, typed `Config` (or one of its sub-structs) by value.

use std::collections::HashSet;
use std::time::Duration;

use config::{Config as RawConfig, Environment};
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use crate::filter::FilterConfig;
use crate::model::Severity;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read environment configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to parse {field}={value:?}: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Raw shape deserialized straight out of environment variables. Every field
/// is a string (or unset) because `config`'s `Environment` source does not
/// know our richer target types (durations, severities, sets) — those are
/// parsed in a second pass by [`Config::load`].
#[derive(Debug, Deserialize)]
struct RawSettings {
    app_env: String,
    log_level: String,
    http_port: u16,
    grpc_port: u16,
    db_driver: String,
    db_dsn: String,
    dlq_path: String,
    dlq_replay_interval: String,
    ingest_min_severity: String,
    ingest_allowed_services: String,
    ingest_excluded_services: String,
    batch_max: usize,
    batch_timeout_ms: u64,
    snapshot_window_minutes: i64,
    snapshot_debounce_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub grpc_port: u16,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub driver: String,
    pub dsn: String,
}

#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub path: String,
    pub replay_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_max: usize,
    pub batch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub window: chrono::Duration,
    pub debounce: Duration,
}

/// Fully parsed, validated process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnv,
    pub log_level: String,
    pub server: ServerConfig,
    pub db: DbConfig,
    pub dlq: DlqConfig,
    pub ingest: FilterConfig,
    pub writer: WriterConfig,
    pub snapshot: SnapshotConfig,
}

impl Config {
    /// Loads configuration from the environment, falling back to the
    /// defaults documented in §6 for anything unset.
    #[instrument(name = "config::load", target = "config", level = "debug")]
    pub fn load() -> Result<Self, ConfigError> {
        let raw = RawConfig::builder()
            .set_default("app_env", "development")?
            .set_default("log_level", "INFO")?
            .set_default("http_port", 8080)?
            .set_default("grpc_port", 4317)?
            .set_default("db_driver", "sqlite")?
            .set_default("db_dsn", "argus.db")?
            .set_default("dlq_path", "./data/dlq")?
            .set_default("dlq_replay_interval", "5m")?
            .set_default("ingest_min_severity", "INFO")?
            .set_default("ingest_allowed_services", "")?
            .set_default("ingest_excluded_services", "")?
            .set_default("batch_max", 500)?
            .set_default("batch_timeout_ms", 200)?
            .set_default("snapshot_window_minutes", 15)?
            .set_default("snapshot_debounce_secs", 5)?
            .add_source(Environment::default())
            .build()?;

        let raw: RawSettings = raw.try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let app_env = match raw.app_env.to_ascii_lowercase().as_str() {
            "production" | "prod" => AppEnv::Production,
            _ => AppEnv::Development,
        };

        let dlq_replay_interval = parse_duration(&raw.dlq_replay_interval).map_err(|reason| {
            ConfigError::Invalid {
                field: "DLQ_REPLAY_INTERVAL",
                value: raw.dlq_replay_interval.clone(),
                reason,
            }
        })?;

        let ingest = FilterConfig {
            min_severity: Severity::normalize(&raw.ingest_min_severity),
            allowed_services: parse_service_set(&raw.ingest_allowed_services),
            excluded_services: parse_service_set(&raw.ingest_excluded_services),
        };

        Ok(Config {
            app_env,
            log_level: raw.log_level,
            server: ServerConfig {
                http_port: raw.http_port,
                grpc_port: raw.grpc_port,
            },
            db: DbConfig {
                driver: raw.db_driver,
                dsn: raw.db_dsn,
            },
            dlq: DlqConfig {
                path: raw.dlq_path,
                replay_interval: dlq_replay_interval,
            },
            ingest,
            writer: WriterConfig {
                batch_max: raw.batch_max,
                batch_timeout: Duration::from_millis(raw.batch_timeout_ms),
            },
            snapshot: SnapshotConfig {
                window: chrono::Duration::minutes(raw.snapshot_window_minutes),
                debounce: Duration::from_secs(raw.snapshot_debounce_secs),
            },
        })
    }
}

/// Parses a comma-separated service list into a set, ignoring blank entries
/// so `INGEST_ALLOWED_SERVICES=""` means "empty set" rather than `{""}`.
fn parse_service_set(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a human duration of the shape `<number><unit>` where unit is one of
/// `s`, `m`, `h` (seconds, minutes, hours); a bare number is seconds.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }

    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => (&raw[..idx], &raw[idx..]),
        None => (raw, "s"),
    };

    let n: u64 = digits
        .parse()
        .map_err(|_| format!("not a number: {digits:?}"))?;

    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        other => return Err(format!("unknown duration unit: {other:?}")),
    };

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minute_durations() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn rejects_garbage_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn service_set_ignores_blank_entries() {
        assert!(parse_service_set("").is_empty());
        assert_eq!(
            parse_service_set("a, b ,c"),
            ["a", "b", "c"].into_iter().map(String::from).collect()
        );
    }

    #[test]
    fn defaults_match_spec_section_six() {
        let raw = RawSettings {
            app_env: "development".into(),
            log_level: "INFO".into(),
            http_port: 8080,
            grpc_port: 4317,
            db_driver: "sqlite".into(),
            db_dsn: "argus.db".into(),
            dlq_path: "./data/dlq".into(),
            dlq_replay_interval: "5m".into(),
            ingest_min_severity: "INFO".into(),
            ingest_allowed_services: "".into(),
            ingest_excluded_services: "".into(),
            batch_max: 500,
            batch_timeout_ms: 200,
            snapshot_window_minutes: 15,
            snapshot_debounce_secs: 5,
        };
        let cfg = Config::from_raw(raw).unwrap();
        assert_eq!(cfg.app_env, AppEnv::Development);
        assert_eq!(cfg.server.grpc_port, 4317);
        assert_eq!(cfg.writer.batch_max, 500);
        assert_eq!(cfg.dlq.replay_interval, Duration::from_secs(300));
        assert_eq!(cfg.ingest.min_severity, Severity::Info);
    }
}
