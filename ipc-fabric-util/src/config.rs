use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

/// File-backed settings for one attachment's fabric endpoint. Loaded once
/// at startup the same way `gen_keys`'s client file is loaded: read to a
/// string, fall back to an empty default on a missing file, then parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    pub physical_name: String,
    pub logical_name: String,
    pub kind: u16,
    pub version: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl FabricConfig {
    pub fn load(path: &str) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn save(&self, path: &str) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
    }
}
