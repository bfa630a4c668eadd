use platewise_core::DocRef;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// CLI settings persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directory holding one local replica per root identity
    pub replica_dir: PathBuf,

    /// Root identity document in use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_doc_id: Option<DocRef>,

    /// Group selected under the current root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_group: Option<DocRef>,
}

impl Default for CliConfig {
    fn default() -> Self {
        let replica_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("platewise")
            .join("replicas");

        Self {
            replica_dir,
            root_doc_id: None,
            selected_group: None,
        }
    }
}

impl CliConfig {
    /// Get the config file path (~/.config/platewise/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("platewise").join("config.toml"))
    }

    /// Load config from `path`, or return the default if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save config to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Could not determine config directory")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn save_then_load_keeps_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = CliConfig {
            replica_dir: dir.path().join("replicas"),
            root_doc_id: Some("doc:root-1".parse().unwrap()),
            selected_group: Some("doc:grp-1".parse().unwrap()),
        };
        config.save(&path).unwrap();
        assert_eq!(CliConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn invalid_doc_ref_in_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "replica_dir = \"/tmp/x\"\nroot_doc_id = \"has space\"\n").unwrap();
        assert!(matches!(CliConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
