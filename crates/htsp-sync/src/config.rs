//! Driver configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use htsp_sync_engine::{ConnectionConfig, SyncConfig};

use crate::error::Result;
use crate::runtime::WorkerPoolConfig;

/// Default HTSP port.
pub const DEFAULT_PORT: u16 = 9982;

/// Everything a [`SyncDriver`](crate::SyncDriver) needs to run sessions.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Server address as `host:port`.
    pub address: String,
    pub sync: SyncConfig,
    pub connection: ConnectionConfig,
    pub runtime: WorkerPoolConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_PORT),
            sync: SyncConfig::default(),
            connection: ConnectionConfig::default(),
            runtime: WorkerPoolConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Config for the server at `address` with everything else defaulted.
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
