//! Orchestrator configuration loaded from environment variables.
//!
//! | Env Var                    | Default                      |
//! |----------------------------|------------------------------|
//! | `KILN_STORE_URL`           | `REDIS_URL`, else in-memory  |
//! | `KILN_STORE_PREFIX`        | `kiln`                       |
//! | `KILN_WORKERS`             | `2`                          |
//! | `KILN_QUEUE_CAPACITY`      | `32`                         |
//! | `KILN_JOB_TIMEOUT_SECS`    | `600`                        |
//! | `KILN_JOB_TTL_SECS`        | `3600`                       |
//! | `KILN_SWEEP_INTERVAL_SECS` | `900`                        |
//! | `KILN_ARTIFACT_ROOT`       | `<tmp>/kiln-artifacts`       |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not valid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Which state store backend to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Connection string of the networked backend; `None` selects in-memory.
    pub url: Option<String>,
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "kiln".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Size of the worker group.
    pub workers: usize,
    /// Jobs that may wait for a worker before submissions are rejected.
    pub queue_capacity: usize,
    /// Execution ceiling per job.
    pub job_timeout: Duration,
    /// Maximum age of a record (and its artifacts).
    pub ttl: Duration,
    /// Reaper period.
    pub sweep_interval: Duration,
    pub artifact_root: PathBuf,
    pub store: StoreConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 32,
            job_timeout: Duration::from_secs(600),
            ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(900),
            artifact_root: std::env::temp_dir().join("kiln-artifacts"),
            store: StoreConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let store = StoreConfig {
            url: lookup("KILN_STORE_URL")
                .or_else(|| lookup("REDIS_URL"))
                .filter(|s| !s.trim().is_empty()),
            key_prefix: lookup("KILN_STORE_PREFIX").unwrap_or(defaults.store.key_prefix),
        };

        let config = Self {
            workers: parse_or(&lookup, "KILN_WORKERS", defaults.workers)?,
            queue_capacity: parse_or(&lookup, "KILN_QUEUE_CAPACITY", defaults.queue_capacity)?,
            job_timeout: secs_or(&lookup, "KILN_JOB_TIMEOUT_SECS", defaults.job_timeout)?,
            ttl: secs_or(&lookup, "KILN_JOB_TTL_SECS", defaults.ttl)?,
            sweep_interval: secs_or(&lookup, "KILN_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            artifact_root: lookup("KILN_ARTIFACT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_root),
            store,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("KILN_WORKERS", self.workers == 0),
            ("KILN_QUEUE_CAPACITY", self.queue_capacity == 0),
            ("KILN_JOB_TIMEOUT_SECS", self.job_timeout.is_zero()),
            ("KILN_JOB_TTL_SECS", self.ttl.is_zero()),
            ("KILN_SWEEP_INTERVAL_SECS", self.sweep_interval.is_zero()),
        ];
        match checks.into_iter().find(|(_, zero)| *zero) {
            Some((var, _)) => Err(ConfigError::Zero(var)),
            None => Ok(()),
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(lookup, var, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(900));
        assert_eq!(config.store.url, None);
        assert_eq!(config.store.key_prefix, "kiln");
    }

    #[test]
    fn store_url_prefers_kiln_variable() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("REDIS_URL", "redis://fallback"),
            ("KILN_STORE_URL", "redis://primary"),
        ]))
        .unwrap();
        assert_eq!(config.store.url.as_deref(), Some("redis://primary"));

        let config =
            OrchestratorConfig::from_lookup(lookup(&[("REDIS_URL", "redis://fallback")])).unwrap();
        assert_eq!(config.store.url.as_deref(), Some("redis://fallback"));
    }

    #[test]
    fn blank_store_url_means_in_memory() {
        let config = OrchestratorConfig::from_lookup(lookup(&[("KILN_STORE_URL", "  ")])).unwrap();
        assert_eq!(config.store.url, None);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("KILN_WORKERS", "8"),
            ("KILN_JOB_TIMEOUT_SECS", " 30 "),
            ("KILN_ARTIFACT_ROOT", "/srv/kiln"),
        ]))
        .unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.job_timeout, Duration::from_secs(30));
        assert_eq!(config.artifact_root, PathBuf::from("/srv/kiln"));
    }

    #[rstest]
    #[case::not_a_number("KILN_WORKERS", "many")]
    #[case::negative("KILN_JOB_TTL_SECS", "-1")]
    fn invalid_numbers_are_rejected(#[case] var: &str, #[case] value: &str) {
        let err = OrchestratorConfig::from_lookup(lookup(&[(var, value)])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[rstest]
    #[case("KILN_WORKERS")]
    #[case("KILN_QUEUE_CAPACITY")]
    #[case("KILN_SWEEP_INTERVAL_SECS")]
    fn zero_values_are_rejected(#[case] var: &'static str) {
        let err = OrchestratorConfig::from_lookup(lookup(&[(var, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Zero(v) if v == var));
    }
}
