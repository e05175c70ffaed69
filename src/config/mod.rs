mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Locations searched when no config file is given, in order
pub const DEFAULT_PATHS: [&str; 2] = ["./mediascan.toml", "~/.config/mediascan/config.toml"];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config).with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// The first default location holding a file, if any.
pub fn find_default_config() -> Option<PathBuf> {
    DEFAULT_PATHS.iter().find_map(|path_str| {
        let path = PathBuf::from(shellexpand::tilde(path_str).as_ref());
        path.exists().then_some(path)
    })
}

/// Load config from the given path, else from default locations, else
/// return the default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    match find_default_config() {
        Some(path) => {
            tracing::debug!("Using config file {:?}", path);
            load_config(&path)
        }
        None => Ok(Config::default()),
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let speed = config.probe.parse_speed;
    if !(0.0..=1.0).contains(&speed) {
        return Err(ConfigError::ParseSpeedOutOfRange(speed));
    }
    if config.probe.head_window_mib == 0 {
        return Err(ConfigError::EmptyHeadWindow);
    }
    Ok(())
}
