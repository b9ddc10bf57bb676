//! Workspace configuration - named tasks loaded from monorail.json

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::workspace::PackageManager;

pub const CONFIG_FILE: &str = "monorail.json";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tasks: HashMap<String, TaskConfig>,
}

/// One orchestrator-level task
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Entries are bare script names, `^script`, or `package#script`
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub cache: CachePolicy,
    pub package_manager: Option<PackageManager>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    #[serde(default)]
    pub skip_read: bool,
    #[serde(default)]
    pub skip_write: bool,
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            return Err(Error::Configuration(format!(
                "no {CONFIG_FILE} found in {}",
                root.display()
            )));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
