use serde::Deserialize;
use std::{env, fs, path::Path, time::Duration};

use crate::ledger::GroupSeed;
use crate::sweeper::SweepSchedule;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    /// Groups created (or renamed) at startup. Existing balances are kept.
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub auction_interval_secs: u64,
    pub task_interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            auction_interval_secs: 60,
            task_interval_secs: 60,
        }
    }
}

impl SweeperConfig {
    pub fn schedule(&self) -> SweepSchedule {
        // A zero period would make tokio::time::interval panic.
        SweepSchedule {
            auction_interval: Duration::from_secs(self.auction_interval_secs.max(1)),
            task_interval: Duration::from_secs(self.task_interval_secs.max(1)),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Yaml(e) => write!(f, "YAML error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        ConfigError::Yaml(value)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt_secret must not be empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for g in &self.groups {
            if !seen.insert(g.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate group id {}", g.id)));
            }
            if let Some(m) = g.members.iter().find(|m| m.points < 0) {
                return Err(ConfigError::Invalid(format!(
                    "member {} of group {} has negative points",
                    m.user, g.id
                )));
            }
            g.task_points
                .check()
                .map_err(|msg| ConfigError::Invalid(format!("group {}: {msg}", g.id)))?;
        }
        Ok(())
    }
}
