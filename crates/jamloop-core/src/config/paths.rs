//! Standard locations for jamloop configuration files

use std::path::PathBuf;

/// Per-user configuration directory
///
/// Returns: `{config_dir}/jamloop` (e.g. `~/.config/jamloop` on Linux),
/// falling back to `./jamloop` when the platform has no config directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jamloop")
}

/// Path of a named config file inside [`config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    config_dir().join(filename)
}
