//! TOML persistence for [`FrameSyncConfig`].
//!
//! The default location is platform-specific:
//! - Linux:    `$XDG_CONFIG_HOME/framesync/config.toml` or `~/.config/framesync/config.toml`
//! - macOS:    `~/Library/Application Support/FrameSync/config.toml`
//! - Windows:  `%APPDATA%\FrameSync\config.toml`
//!
//! A missing file is not an error: it loads as `FrameSyncConfig::default()`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::domain::config::FrameSyncConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined from the environment.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config at `path`, returning the defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<FrameSyncConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FrameSyncConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &FrameSyncConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads from `path`, or from [`default_config_path`] when `None`.
///
/// Any error is logged and replaced by the defaults; a broken config file
/// should not keep the sidebar from starting.
pub fn load_or_default(path: Option<&Path>) -> FrameSyncConfig {
    let resolved = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Ok(path) => path,
            Err(e) => {
                warn!("{e}; using default config");
                return FrameSyncConfig::default();
            }
        },
    };
    load_config(&resolved).unwrap_or_else(|e| {
        warn!(path = %resolved.display(), "{e}; using default config");
        FrameSyncConfig::default()
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("FrameSync"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("framesync"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("FrameSync")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
