//! User configuration
//!
//! Reads `config.toml` from the config directory. Every field is optional;
//! command line flags win over the file, and the file wins over the
//! built-in defaults in [`crate::config::defaults`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::core::target::Target;
use crate::error::ConfigError;
use crate::infra::dirs::WeaverDirs;

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaverConfig {
    /// Build settings
    #[serde(default)]
    pub build: BuildSection,

    /// Store settings
    #[serde(default)]
    pub store: StoreSection,

    /// Default target
    #[serde(default)]
    pub target: TargetSection,
}

/// `[build]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSection {
    /// Concurrent builds
    pub jobs: Option<usize>,
    /// Container engine: `docker`, `podman` or `auto`
    pub engine: Option<String>,
    /// Base image for component builds
    pub base_image: Option<String>,
}

/// `[store]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSection {
    /// Store root
    pub path: Option<PathBuf>,
    /// Longest wait on another process's reservation, in seconds
    pub reservation_wait_secs: Option<u64>,
    /// Age after which a reservation is treated as abandoned, in seconds
    pub stale_after_secs: Option<u64>,
}

/// `[target]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSection {
    pub arch: Option<String>,
    pub vendor: Option<String>,
    pub os: Option<String>,
}

impl WeaverConfig {
    /// Load `config.toml` from the config directory
    pub fn load(dirs: &WeaverDirs) -> Result<Self, ConfigError> {
        Self::load_from_path(&dirs.config_path())
    }

    /// Load a config file; a missing file gives the defaults
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        tracing::debug!("Loaded configuration from '{}'", path.display());
        Ok(config)
    }

    /// Write the config file, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |p: &Path, e: String| ConfigError::Write {
            path: p.display().to_string(),
            error: e,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(parent, e.to_string()))?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| write_error(path, e.to_string()))?;
        fs::write(path, content).map_err(|e| write_error(path, e.to_string()))
    }

    /// Concurrent builds, defaulting to the CPU count
    pub fn jobs(&self) -> usize {
        self.build.jobs.filter(|j| *j > 0).unwrap_or_else(num_cpus::get)
    }

    /// Base image for component builds
    pub fn base_image(&self) -> &str {
        self.build
            .base_image
            .as_deref()
            .unwrap_or(defaults::BASE_IMAGE)
    }

    /// Store root, defaulting to the platform data directory
    pub fn store_path(&self, dirs: &WeaverDirs) -> PathBuf {
        self.store.path.clone().unwrap_or_else(|| dirs.store_dir())
    }

    /// Longest wait on another process's reservation
    pub fn reservation_wait(&self) -> Duration {
        Duration::from_secs(
            self.store
                .reservation_wait_secs
                .unwrap_or(defaults::RESERVATION_WAIT_SECS),
        )
    }

    /// Age after which an unverifiable reservation is stale
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(
            self.store
                .stale_after_secs
                .unwrap_or(defaults::STALE_RESERVATION_SECS),
        )
    }

    /// Default target; the architecture falls back to the host's
    pub fn target(&self) -> Target {
        let host = Target::default();
        Target::new(
            self.target.arch.clone().unwrap_or(host.arch),
            self.target.vendor.clone().unwrap_or(host.vendor),
            self.target.os.clone().unwrap_or(host.os),
        )
    }
}
