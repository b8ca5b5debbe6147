//! YAML configuration I/O
//!
//! Loading never fails: a missing or unreadable file yields the type's
//! defaults and a log line. Saving reports failures with context.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use super::EngineConfig;

/// Load a YAML config file, falling back to `T::default()`
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("load_config: {:?} not found, using defaults", path);
        return T::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("load_config: Failed to read {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("load_config: Loaded {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("load_config: Failed to parse {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Load an [`EngineConfig`], replacing it with defaults if it fails validation
pub fn load_engine_config(path: &Path) -> EngineConfig {
    let config: EngineConfig = load_config(path);
    match config.validate() {
        Ok(()) => config,
        Err(e) => {
            log::warn!("load_engine_config: {}, using defaults", e);
            EngineConfig::default()
        }
    }
}

/// Save a config as YAML, creating parent directories as needed
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Saved {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PermutationChangeRate;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/jamloop/engine.yaml"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.yaml");

        let config = EngineConfig {
            sample_rate: 44100,
            change_rate: PermutationChangeRate::Bar,
            transition_samples: 2205,
            ..EngineConfig::default()
        };

        save_config(&config, &path).unwrap();
        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "sample_rate: 96000\nchange_rate: FourBars\n").unwrap();

        let loaded = load_engine_config(&path);
        assert_eq!(loaded.sample_rate, 96000);
        assert_eq!(loaded.change_rate, PermutationChangeRate::FourBars);
        assert_eq!(loaded.command_queue_capacity, EngineConfig::default().command_queue_capacity);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "command_queue_capacity: 0\n").unwrap();
        assert_eq!(load_engine_config(&path), EngineConfig::default());

        std::fs::write(&path, "sample_rate: [not, a, number]\n").unwrap();
        assert_eq!(load_engine_config(&path), EngineConfig::default());
    }
}
