//! Node configuration.
//!
//! Options are loaded from YAML files. A configuration is optional:
//! `NodeConfig::default()` yields a node that claims every domain it
//! has no gateway for and prepends `.` to bare device names.
//!
//! # YAML Structure
//!
//! ```yaml
//! default_domain: "."
//! domains:
//!   - lab
//!   - factory
//! claim_unowned: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Domain prepended to device ids that carry no domain part.
pub const DEFAULT_DOMAIN: &str = ".";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Node options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Domain applied when a raw device id has no colon.
    #[serde(default = "default_domain")]
    pub default_domain: String,

    /// Domains this node claims authority for. Currently advisory; the
    /// resolver falls back on the claim-if-no-gateway rule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,

    /// Whether the node is authoritative for domains no gateway covers.
    #[serde(default = "default_true")]
    pub claim_unowned: bool,
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            default_domain: default_domain(),
            domains: Vec::new(),
            claim_unowned: true,
        }
    }
}

impl NodeConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from YAML text.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load a configuration from a single YAML file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.default_domain, ".");
        assert!(config.domains.is_empty());
        assert!(config.claim_unowned);
    }

    #[test]
    fn test_parse_yaml() {
        let config = NodeConfig::from_str(
            "default_domain: lab\ndomains:\n  - lab\n  - factory\nclaim_unowned: false\n",
        )
        .unwrap();
        assert_eq!(config.default_domain, "lab");
        assert_eq!(config.domains, vec!["lab", "factory"]);
        assert!(!config.claim_unowned);
    }

    #[test]
    fn test_parse_empty_yaml_uses_defaults() {
        let config = NodeConfig::from_str("{}").unwrap();
        assert_eq!(config.default_domain, ".");
        assert!(config.claim_unowned);
    }
}
