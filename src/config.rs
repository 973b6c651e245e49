//! Simulation Configuration
//!
//! Serde-backed settings for a run: venue timing/risk plus the valuation
//! numeraire. Defaults reproduce the reference setup (1 ms each way, 10 s
//! order gap, 10e6 NOP cap, USD numeraire).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::gateway::LpConfig;

fn default_numeraire() -> String {
    "USD".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// LP venue settings.
    #[serde(default)]
    pub lp: LpConfig,
    /// Currency all risk figures are expressed in.
    #[serde(default = "default_numeraire")]
    pub numeraire: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            lp: LpConfig::default(),
            numeraire: default_numeraire(),
        }
    }
}

impl SimConfig {
    /// Load settings from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {}", e),
            Self::Parse(e) => write!(f, "config parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}
