use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AdPilotConfig {
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub platform: PlatformConfig,
    pub record_store: RecordStoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Path of the local sled execution-record store.
    pub persistence_path: String,
    /// Scheduler tick interval.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Execute-route requests per second; None disables rate limiting.
    pub rate_limit: Option<u32>,
    pub api_keys: Vec<String>,
}

/// Ads-platform Graph-style API endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub access_token: String,
}

/// REST table store holding rules, insights and label assignments.
#[derive(Debug, Deserialize, Clone)]
pub struct RecordStoreConfig {
    pub base_url: String,
    pub api_token: String,
}

fn default_tick_seconds() -> u64 {
    60
}

impl AdPilotConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let config: AdPilotConfig = settings.try_deserialize()?;
        Ok(config)
    }
}
