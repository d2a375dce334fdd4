use crate::controller::{ControllerSettings, RetryPolicy, SENSE_HAT_DEVICE_NAME};
use crate::controller::device_locator::{DEFAULT_DEVICE_DIR, DEFAULT_REGISTRY_DIR};
use crate::sampling::SchedulerSettings;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_DIR: &str = "sensehat-link";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,
    pub device: DeviceConfig,
    pub input: InputConfig,
    pub sampling: SamplingConfig,
    pub nodes: NodesConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    pub registry_dir: PathBuf,
    pub device_dir: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    /// 0 retries forever
    pub retry_max_attempts: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub slow_interval_ms: u64,
    pub fast_initial_delay_ms: u64,
    /// Seed value of the writable fast-interval node
    pub fast_interval_ms: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NodesConfig {
    /// Paths subscribed at startup, for running without a broker
    pub subscribed: Vec<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            device: DeviceConfig::default(),
            input: InputConfig::default(),
            sampling: SamplingConfig::default(),
            nodes: NodesConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: SENSE_HAT_DEVICE_NAME.to_string(),
            registry_dir: PathBuf::from(DEFAULT_REGISTRY_DIR),
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            retry_initial_backoff_ms: 500,
            retry_max_backoff_ms: 30_000,
            retry_max_attempts: 0,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            slow_interval_ms: 500,
            fast_initial_delay_ms: 10,
            fast_interval_ms: 50,
        }
    }
}

impl LinkConfig {
    /// `$XDG_CONFIG_HOME/sensehat-link/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`; a missing file yields the defaults
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling.slow_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sampling.slow_interval_ms must be positive".to_string(),
            ));
        }
        if self.sampling.fast_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sampling.fast_interval_ms must be positive".to_string(),
            ));
        }
        if self.input.retry_max_backoff_ms < self.input.retry_initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "input.retry_max_backoff_ms is smaller than retry_initial_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            device_name: self.device.name.clone(),
            registry_dir: self.device.registry_dir.clone(),
            device_dir: self.device.device_dir.clone(),
            retry: RetryPolicy {
                initial_backoff: Duration::from_millis(self.input.retry_initial_backoff_ms),
                max_backoff: Duration::from_millis(self.input.retry_max_backoff_ms),
                max_attempts: self.input.retry_max_attempts,
            },
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            slow_interval: Duration::from_millis(self.sampling.slow_interval_ms),
            fast_initial_delay: Duration::from_millis(self.sampling.fast_initial_delay_ms),
            fast_default_interval: Duration::from_millis(self.sampling.fast_interval_ms),
        }
    }

    pub fn fast_interval_secs(&self) -> f64 {
        Duration::from_millis(self.sampling.fast_interval_ms).as_secs_f64()
    }
}
