//! Loading and saving [`DispatcherConfig`] files.

use super::{ConfigError, DispatcherConfig};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "controller-dispatcher";
const CONFIG_FILE: &str = "config.toml";

fn get_config_base_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    })
}

/// `<config dir>/controller-dispatcher/config.toml`
pub fn default_config_path() -> PathBuf {
    let mut path = get_config_base_dir();
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

fn io_error(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads and validates the configuration at `path`
pub async fn load(path: &Path) -> Result<DispatcherConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| io_error(path, e))?;
    let config = DispatcherConfig::from_toml_str(&content)?;
    debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Writes `config` to `path`, creating parent directories as needed
pub async fn save(config: &DispatcherConfig, path: &Path) -> Result<(), ConfigError> {
    config.validate()?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
    }

    let content = config.to_toml_string()?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| io_error(path, e))?;
    debug!("Saved configuration to {}", path.display());
    Ok(())
}

/// Loads the configuration at `path`, writing the defaults first if the file
/// does not exist yet
pub async fn ensure_default_config(path: &Path) -> Result<DispatcherConfig, ConfigError> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| io_error(path, e))?;

    if !exists {
        info!("Creating default configuration at {}", path.display());
        let config = DispatcherConfig::default();
        save(&config, path).await?;
        return Ok(config);
    }

    load(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::ModuleOverride;

    #[tokio::test]
    async fn creates_default_file_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let config = ensure_default_config(&path).await.expect("default config");
        assert_eq!(config, DispatcherConfig::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn save_then_load_keeps_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut config = DispatcherConfig::default();
        config.dispatcher.max_consecutive_failures = 5;
        config.modules.insert(
            "ScaleAvatar".to_string(),
            ModuleOverride {
                enabled: false,
                ..Default::default()
            },
        );
        save(&config, &path).await.expect("save");

        let loaded = ensure_default_config(&path).await.expect("load");
        assert_eq!(loaded.dispatcher.max_consecutive_failures, 5);
        assert!(!loaded.is_module_enabled("ScaleAvatar"));
        assert!(loaded.is_module_enabled("LeftNearGrabEntity"));
    }

    #[tokio::test]
    async fn invalid_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[dispatcher]\nframe_rate_hz = 0\n")
            .await
            .expect("write");

        assert!(matches!(load(&path).await, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = load(&dir.path().join("absent.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
