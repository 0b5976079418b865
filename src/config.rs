//! Application configuration
//!
//! Settings load from an optional YAML file; anything absent falls back to
//! defaults, and the CLI can override individual fields.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// DNS zone appended to generated host names
    pub dns_zone: Option<String>,
    /// SAN store snapshot location; in-memory only when unset
    pub san_snapshot_path: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Output logs as JSON
    pub log_json: bool,
    /// Default boot method passed to resource adapters on startup
    pub boot_method: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dns_zone: None,
            san_snapshot_path: None,
            log_level: "info".to_string(),
            log_json: false,
            boot_method: "n".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw).map_err(|err| {
            Error::Configuration(format!(
                "Invalid configuration file [{}]: {err}",
                path.display()
            ))
        })
    }

    /// Load from a file when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dns_zone: cluster.example.com\nlog_json: true").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.dns_zone.as_deref(), Some("cluster.example.com"));
        assert!(config.log_json);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_yaml_is_a_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level: [not, a, string").unwrap();

        assert_matches!(AppConfig::load(file.path()), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load_or_default(None).unwrap();
        assert!(config.dns_zone.is_none());
        assert_eq!(config.log_level, "info");
    }
}
