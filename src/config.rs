//! Engine configuration
//!
//! Defaults, then an optional TOML file, then `APPROVAL_*` environment
//! variables, then validation.
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub sweeper: SweeperConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub budget_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationConfig {
    /// Send attempts per approver before relying on the step timeout.
    pub max_attempts: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                path: PathBuf::from("approvals.db"),
            },
            sweeper: SweeperConfig {
                interval_secs: 60,
                budget_secs: 30,
            },
            notifications: NotificationConfig { max_attempts: 3 },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Compact,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigPatch {
    store: Option<StorePatch>,
    sweeper: Option<SweeperPatch>,
    notifications: Option<NotificationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorePatch {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SweeperPatch {
    interval_secs: Option<u64>,
    budget_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NotificationPatch {
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl EngineConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
                path: path.clone(),
                source,
            })?;
            let patch = toml::from_str::<ConfigPatch>(&raw)
                .map_err(|source| ConfigError::ParseFile { path, source })?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options
                .config_path
                .unwrap_or_else(|| PathBuf::from("approvals.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Defaults patched with `raw`, validated. No environment lookup.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_patch(toml::from_str::<ConfigPatch>(raw)?);
        config.validate()?;
        Ok(config)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper.interval_secs)
    }

    pub fn sweep_budget(&self) -> Duration {
        Duration::from_secs(self.sweeper.budget_secs)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(store) = patch.store {
            if let Some(path) = store.path {
                self.store.path = path;
            }
        }

        if let Some(sweeper) = patch.sweeper {
            if let Some(interval_secs) = sweeper.interval_secs {
                self.sweeper.interval_secs = interval_secs;
            }
            if let Some(budget_secs) = sweeper.budget_secs {
                self.sweeper.budget_secs = budget_secs;
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(max_attempts) = notifications.max_attempts {
                self.notifications.max_attempts = max_attempts;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = lookup("APPROVAL_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(value) = lookup("APPROVAL_SWEEP_INTERVAL_SECS") {
            self.sweeper.interval_secs = parse_override("APPROVAL_SWEEP_INTERVAL_SECS", value)?;
        }
        if let Some(value) = lookup("APPROVAL_SWEEP_BUDGET_SECS") {
            self.sweeper.budget_secs = parse_override("APPROVAL_SWEEP_BUDGET_SECS", value)?;
        }
        if let Some(value) = lookup("APPROVAL_NOTIFY_MAX_ATTEMPTS") {
            self.notifications.max_attempts = parse_override("APPROVAL_NOTIFY_MAX_ATTEMPTS", value)?;
        }
        if let Some(level) = lookup("APPROVAL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(value) = lookup("APPROVAL_LOG_FORMAT") {
            self.logging.format = match value.trim().to_ascii_lowercase().as_str() {
                "compact" => LogFormat::Compact,
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::InvalidEnvOverride {
                        key: "APPROVAL_LOG_FORMAT".to_string(),
                        value,
                    });
                }
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sweeper.interval_secs must be greater than zero".into(),
            ));
        }
        if self.sweeper.budget_secs == 0 {
            return Err(ConfigError::Validation(
                "sweeper.budget_secs must be greater than zero".into(),
            ));
        }
        if self.notifications.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "notifications.max_attempts must be at least 1".into(),
            ));
        }
        if tracing::Level::from_str(&self.logging.level).is_err() {
            return Err(ConfigError::Validation(format!(
                "unknown log level `{}`",
                self.logging.level
            )));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [
        PathBuf::from("approvals.toml"),
        PathBuf::from("config/approvals.toml"),
    ]
    .into_iter()
    .find(|path| path.exists())
}

fn parse_override<T: FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride {
            key: key.to_string(),
            value,
        })
}
