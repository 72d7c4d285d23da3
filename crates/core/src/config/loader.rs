//! Config path resolution
//!
//! Handles locating the engine config file and resolving paths inside it.

use std::path::{Path, PathBuf};

use super::{ConfigError, ConfigResult};

/// Environment variable that overrides the config file location
pub const CONFIG_ENV: &str = "SITEGATE_CONFIG";

/// Config file name used when the environment does not name one
pub const DEFAULT_CONFIG_FILE: &str = "sitegate.toml";

/// Returns the engine config path.
///
/// Uses `$SITEGATE_CONFIG` when set, otherwise `sitegate.toml` in the
/// current working directory.
pub fn config_path() -> ConfigResult<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    let cwd = std::env::current_dir().map_err(ConfigError::IoError)?;
    Ok(cwd.join(DEFAULT_CONFIG_FILE))
}

/// Resolve a path from the config file relative to the file's directory.
///
/// Absolute paths are returned unchanged.
pub fn resolve_relative(config_file: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    config_file
        .parent()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative() {
        let config = PathBuf::from("/srv/app/sitegate.toml");

        assert_eq!(
            resolve_relative(&config, Path::new("permissions.toml")),
            PathBuf::from("/srv/app/permissions.toml")
        );
        assert_eq!(
            resolve_relative(&config, Path::new("/etc/perms.json")),
            PathBuf::from("/etc/perms.json")
        );
    }
}
