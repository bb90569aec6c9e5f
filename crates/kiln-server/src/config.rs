use kiln_core::config::ConfigError;

use crate::runner::RunnerSettings;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// Orchestrator settings (`KILN_*`) are loaded separately by
/// [`kiln_core::OrchestratorConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5002`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How build jobs are executed.
    pub runner: RunnerSettings,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                                                |
    /// |------------------------|--------------------------------------------------------|
    /// | `HOST`                 | `0.0.0.0`                                              |
    /// | `PORT`                 | `5002`                                                 |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`                                |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                                                   |
    /// | `KILN_BUILD_PROGRAM`   | `pyinstaller`                                          |
    /// | `KILN_BUILD_ARGS`      | `--onefile --distpath {dist} --workpath {work} {source}` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());

        let port = parse(&lookup, "PORT", 5002u16)?;

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = parse(&lookup, "REQUEST_TIMEOUT_SECS", 30u64)?;
        if request_timeout_secs == 0 {
            return Err(ConfigError::Zero("REQUEST_TIMEOUT_SECS"));
        }

        let defaults = RunnerSettings::default();
        let program = lookup("KILN_BUILD_PROGRAM")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.program);
        let args = match lookup("KILN_BUILD_ARGS") {
            Some(template) => template.split_whitespace().map(str::to_string).collect(),
            None => defaults.args,
        };

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            runner: RunnerSettings { program, args },
        })
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
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
