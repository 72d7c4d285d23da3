//! Configuration for the permission engine
//!
//! Settings are read from a TOML file. A missing file is created with the
//! defaults so a first run leaves an editable file behind.
//!
//! # Example
//!
//! ```toml
//! version = 1
//! backend = "file"
//! debug = false
//! allow_ops = true
//! strict_inheritance = false
//!
//! [file]
//! path = "permissions.toml"
//! default_permissions = ["site.view"]
//! ```

mod loader;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use loader::{config_path, resolve_relative, CONFIG_ENV, DEFAULT_CONFIG_FILE};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for the `file` backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    /// Permissions file (`.toml` or `.json`), relative to the config file
    pub path: PathBuf,

    /// Permissions given to the `default` group of a freshly created file
    pub default_permissions: Vec<String>,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("permissions.toml"),
            default_permissions: vec!["site.view".to_string()],
        }
    }
}

/// Permission engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Backend alias (`"file"`, `"memory"`, or any registered alias)
    pub backend: String,

    /// Dump the loaded permission tree and log resolution detail
    pub debug: bool,

    /// Honour `op` / `notop` node defaults
    pub allow_ops: bool,

    /// Reject cyclic parent assignments instead of skipping them with a warning
    pub strict_inheritance: bool,

    pub file: FileSettings,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            version: 1,
            backend: "file".to_string(),
            debug: false,
            allow_ops: true,
            strict_inheritance: false,
            file: FileSettings::default(),
        }
    }
}

impl PermissionsConfig {
    /// Load config from file, creating default if missing.
    ///
    /// The file backend path is resolved against the config file's directory.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded permissions config from {:?}", path);
            config
        } else {
            let default = Self::default();
            default.save(path)?;
            tracing::info!("Created default permissions config at {:?}", path);
            default
        };

        config.file.path = resolve_relative(path, &config.file.path);
        Ok(config)
    }

    /// Load config from the location given by [`config_path`].
    pub fn load_default() -> ConfigResult<Self> {
        Self::load(&config_path()?)
    }

    /// Save config to file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved permissions config to {:?}", path);
        Ok(())
    }

    /// Reload config from file.
    pub fn reload(&mut self, path: &Path) -> ConfigResult<()> {
        let content = std::fs::read_to_string(path)?;
        *self = toml::from_str(&content)?;
        self.file.path = resolve_relative(path, &self.file.path);
        tracing::debug!("Reloaded permissions config from {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PermissionsConfig::default();
        assert_eq!(config.version, 1);
        assert_eq!(config.backend, "file");
        assert!(!config.debug);
        assert!(config.allow_ops);
        assert!(!config.strict_inheritance);
    }

    #[test]
    fn test_config_partial_toml_uses_defaults() {
        let config: PermissionsConfig = toml::from_str("backend = \"memory\"\ndebug = true").unwrap();
        assert_eq!(config.backend, "memory");
        assert!(config.debug);
        assert_eq!(config.file, FileSettings::default());
    }

    #[test]
    fn test_load_creates_default_and_resolves_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sitegate.toml");

        let config = PermissionsConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.file.path, dir.path().join("permissions.toml"));

        let mut reloaded = PermissionsConfig::default();
        reloaded.reload(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_config_serialize() {
        let config = PermissionsConfig {
            backend: "memory".to_string(),
            strict_inheritance: true,
            ..PermissionsConfig::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("backend = \"memory\""));
        assert!(toml_str.contains("strict_inheritance = true"));
    }
}
