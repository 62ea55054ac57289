use async_trait::async_trait;
use dashmap::DashMap;
use std::{env, path::PathBuf, time::Duration};
use tracing::{debug, info, warn};

use crate::logger::LogConfig;

pub const LOG_LEVEL_KEY: &str = "NODEFLOW_LOG_LEVEL";
pub const LOG_DIR_KEY: &str = "NODEFLOW_LOG_DIR";
pub const STOP_TIMEOUT_KEY: &str = "NODEFLOW_STOP_TIMEOUT_MS";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_STOP_TIMEOUT_MS: u64 = 2000;

/// Read-only key/value configuration backend.
#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub fn into_inner(self) -> Box<dyn ConfigManagerType> {
        self.0
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Reads the process environment, seeded from a `.env` file if present.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        match dotenvy::from_path(&env_file) {
            Ok(()) => info!("Loaded .env from {}", env_file.display()),
            Err(err) => debug!("no .env loaded from {}: {}", env_file.display(), err),
        }
        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

/// In-memory backend, filled by the embedding program.
#[derive(Debug, Clone, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Runtime knobs for a flow and its logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSettings {
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    /// How long `Flow::shutdown` waits for runners before aborting them.
    pub stop_timeout: Duration,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_dir: None,
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
        }
    }
}

impl FlowSettings {
    pub async fn load(config: &ConfigManager) -> Self {
        let log_level = config
            .0
            .get(LOG_LEVEL_KEY)
            .await
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let log_dir = config.0.get(LOG_DIR_KEY).await.map(PathBuf::from);
        let stop_timeout_ms = match config.0.get(STOP_TIMEOUT_KEY).await {
            Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|err| {
                warn!(
                    "{STOP_TIMEOUT_KEY}=`{raw}` is not a number ({err}), \
                     using {DEFAULT_STOP_TIMEOUT_MS}"
                );
                DEFAULT_STOP_TIMEOUT_MS
            }),
            None => DEFAULT_STOP_TIMEOUT_MS,
        };
        Self {
            log_level,
            log_dir,
            stop_timeout: Duration::from_millis(stop_timeout_ms),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig::new(self.log_level.clone(), self.log_dir.clone())
    }
}
