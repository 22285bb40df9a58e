use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use arbor_merge::MergeConfig;
use arbor_store::StoreConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// File name of the checkpoint log inside `data_dir`.
pub const CHECKPOINT_LOG: &str = "checkpoints.log";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub store: StoreConfig,
    pub merge: MergeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 7420)),
            data_dir: PathBuf::from(".arbor"),
            store: StoreConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> ServerResult<Self> {
        toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(CHECKPOINT_LOG)
    }
}
