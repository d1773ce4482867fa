use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Root configuration for the StreamGate control plane. One TOML file,
/// one section per concern; see `configs/streamgate.toml` for a fixture.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamGateConfig {
    pub subscription: SubscriptionSection,
    pub manifest: ManifestSection,
    pub presets: PresetsSection,
    pub pools: PoolsSection,
    pub engine: EngineSection,
    pub signing: SigningSection,
    pub notifications: NotificationsSection,
    pub alerts: AlertsSection,
    pub reconcile: ReconcileSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSection {
    /// Redelivery delay hint returned on nack, and the budget the whole
    /// handler must finish within.
    pub ack_deadline_seconds: u64,
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestSection {
    pub bucket: String,
    pub ttl_seconds: u64,
    pub cdn_base_url: String,
}

/// ABR ladders in the compact `name|WxH|kbps, ...` form, parsed once at
/// provisioner construction.
#[derive(Debug, Clone, Deserialize)]
pub struct PresetsSection {
    pub reels: String,
    pub series: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolsSection {
    pub reels_ingest: String,
    pub reels_egress: String,
    pub series_ingest: String,
    pub series_egress: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    pub api_base: String,
    pub api_token_path: PathBuf,
    pub request_timeout_seconds: u64,
    pub max_provision_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    #[serde(default)]
    pub retry_jitter: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningSection {
    pub signing_key_id: String,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsSection {
    pub playback_ready_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsSection {
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileSection {
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Stamped into replay events for records persisted before tenants
    /// were recorded.
    pub default_tenant: String,
    pub home_region: String,
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_batch_limit() -> usize {
    20
}

pub fn load_streamgate_config<P: AsRef<Path>>(path: P) -> Result<StreamGateConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
