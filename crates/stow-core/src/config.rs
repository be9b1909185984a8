use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level daemon configuration (loaded from stow.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StowConfig {
    pub gateway: GatewayConfig,
    pub data: DataConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// TCP listen address (default: 127.0.0.1:4719)
    pub listen: String,
    /// Directory served as the browser UI; a built-in page is used when unset
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding settings.json, archive.bin, and history.json
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4719".into(),
            static_dir: None,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/stow"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl StowConfig {
    pub fn settings_path(&self) -> PathBuf {
        self.data.dir.join("settings.json")
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data.dir.join("archive.bin")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data.dir.join("history.json")
    }
}
