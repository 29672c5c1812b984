//! Platform-specific directory management
//!
//! Weaver keeps two locations: the config directory holding `config.toml`
//! and the store. Both follow XDG on Linux and the usual Library locations
//! on macOS, and both can be overridden from the environment:
//! - `WEAVER_CONFIG_DIR` - Override config directory
//! - `WEAVER_STORE_DIR` - Override store root

use std::env;
use std::path::PathBuf;

/// Environment variable names for directory overrides
pub const ENV_CONFIG_DIR: &str = "WEAVER_CONFIG_DIR";
pub const ENV_STORE_DIR: &str = "WEAVER_STORE_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "weaver";

const CONFIG_FILE: &str = "config.toml";
const STORE_SUBDIR: &str = "store";

/// Platform-specific directory provider for weaver
#[derive(Debug, Clone)]
pub struct WeaverDirs {
    config_dir: PathBuf,
    store_dir: PathBuf,
}

impl WeaverDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: env::var_os(ENV_CONFIG_DIR)
                .map_or_else(Self::platform_config_dir, PathBuf::from),
            store_dir: env::var_os(ENV_STORE_DIR)
                .map_or_else(Self::platform_store_dir, PathBuf::from),
        }
    }

    /// Config directory
    ///
    /// - Linux: `$XDG_CONFIG_HOME/weaver` or `~/.config/weaver`
    /// - macOS: `~/Library/Application Support/weaver`
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Path of `config.toml`
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Default store root
    ///
    /// - Linux: `$XDG_DATA_HOME/weaver/store` or `~/.local/share/weaver/store`
    /// - macOS: `~/Library/Application Support/weaver/store`
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.store_dir.clone()
    }

    fn platform_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
            })
    }

    fn platform_store_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                // Fallback to home directory
                dirs::home_dir()
                    .map(|h| h.join(".local").join("share").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".local").join("share").join(APP_NAME))
            })
            .join(STORE_SUBDIR)
    }
}

impl Default for WeaverDirs {
    fn default() -> Self {
        Self::new()
    }
}
