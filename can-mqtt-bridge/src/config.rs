//! Persisted bridge configuration
//!
//! One TOML document holding the general connection settings, the list of
//! DBC files and the selected-metric snapshot. Key names follow the
//! documented external interface, so existing documents keep working when
//! the bridge is rebuilt.

use crate::types::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// One DBC file entry
///
/// Both fields carry the file path; `name` is read first with `FileName`
/// as the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbcFileEntry {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "FileName", default)]
    pub file_name: String,
}

impl DbcFileEntry {
    pub fn path(&self) -> &str {
        if self.name.is_empty() {
            &self.file_name
        } else {
            &self.name
        }
    }
}

/// One persisted selected metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedItemEntry {
    pub name: String,
    pub msg_id: i64,
    pub msg_name: String,
}

/// The persisted configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfigDoc {
    #[serde(rename = "SharedMem", default, skip_serializing_if = "String::is_empty")]
    pub shared_mem: String,

    #[serde(rename = "BusHost", default, skip_serializing_if = "String::is_empty")]
    pub bus_host: String,

    #[serde(rename = "BusPort", default, skip_serializing_if = "is_zero")]
    pub bus_port: u16,

    #[serde(rename = "BrokerHost", default = "default_broker_host")]
    pub broker_host: String,

    #[serde(rename = "BrokerPort", default = "default_broker_port")]
    pub broker_port: u16,

    #[serde(rename = "DbcFiles", default, skip_serializing_if = "Vec::is_empty")]
    pub dbc_files: Vec<DbcFileEntry>,

    #[serde(
        rename = "SelectedItems",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub selected_items: Vec<SelectedItemEntry>,
}

impl Default for BridgeConfigDoc {
    fn default() -> Self {
        Self {
            shared_mem: String::new(),
            bus_host: String::new(),
            bus_port: 0,
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            dbc_files: Vec::new(),
            selected_items: Vec::new(),
        }
    }
}

/// Read a configuration document; the file must exist
pub fn read_document(path: &Path) -> Result<BridgeConfigDoc> {
    if !path.exists() {
        return Err(BridgeError::Config(format!(
            "The config file doesn't exist: {:?}",
            path
        )));
    }
    let content = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
    toml::from_str(&content)
        .map_err(|e| BridgeError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
}

/// Write a configuration document, creating parent directories if absent
pub fn write_document(path: &Path, doc: &BridgeConfigDoc) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                BridgeError::Config(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }
    }
    let content = toml::to_string_pretty(doc)
        .map_err(|e| BridgeError::Config(format!("Failed to encode config: {}", e)))?;
    fs::write(path, content)
        .map_err(|e| BridgeError::Config(format!("Failed to write config file {:?}: {}", path, e)))
}
