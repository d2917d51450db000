//! Persisted sync configuration and device identity

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::MetaStore;
use crate::util::now_ms;

/// Default auto-sync interval in milliseconds.
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 10_000;

const CONFIG_META_KEY: &str = "sync_config";
const DEVICE_ID_META_KEY: &str = "device_id";

/// Sync engine configuration, persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Master switch for the sync engine
    pub enabled: bool,
    /// Whether the recurring auto-sync timer is armed
    pub auto_sync: bool,
    /// Auto-sync interval in milliseconds
    pub interval: u64,
    /// ISO-8601 time of the last successful sync
    pub last_sync: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_sync: false,
            interval: DEFAULT_SYNC_INTERVAL_MS,
            last_sync: None,
        }
    }
}

impl SyncConfig {
    /// Load the persisted configuration, or defaults when none exists.
    pub async fn load<S: MetaStore + ?Sized>(store: &S) -> Result<Self> {
        match store.get_meta(CONFIG_META_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Self::default()),
        }
    }

    /// Persist the configuration.
    pub async fn save<S: MetaStore + ?Sized>(&self, store: &S) -> Result<()> {
        store
            .set_meta(CONFIG_META_KEY, &serde_json::to_string(self)?)
            .await
    }
}

/// Load the persisted device id, generating and persisting one on first use.
///
/// Device ids distinguish sync participants in uploaded payloads for
/// diagnostics; conflict resolution never consults them.
pub async fn load_or_create_device_id<S: MetaStore + ?Sized>(store: &S) -> Result<String> {
    if let Some(existing) = store.get_meta(DEVICE_ID_META_KEY).await? {
        return Ok(existing);
    }
    let device_id = generate_device_id();
    store.set_meta(DEVICE_ID_META_KEY, &device_id).await?;
    Ok(device_id)
}

fn generate_device_id() -> String {
    let hex = uuid::Uuid::now_v7().simple().to_string();
    // The trailing half of a v7 uuid carries the random bits.
    let suffix = &hex[hex.len() - 8..];
    format!("device_{}_{suffix}", now_ms())
}
