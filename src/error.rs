//! Error types for weaver
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Content hashing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// The configuration still contains a range, an alias or an unbound dependency
    #[error("Cannot hash unresolved configuration for '{component}': {reason}")]
    UnresolvedConfig { component: String, reason: String },

    /// Canonical serialization failed
    #[error("Failed to serialize configuration for '{component}': {error}")]
    Serialize { component: String, error: String },
}

/// Catalog loading and validation errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Failed to read the catalog file
    #[error("Failed to read catalog '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Failed to parse the catalog file
    #[error("Failed to parse catalog: {0}")]
    Parse(String),

    /// Component name is not valid
    #[error("Invalid component name '{name}': names use lowercase letters, digits, '.', '_', '+' and '-'")]
    InvalidName { name: String },

    /// Component version is not valid
    #[error("Component '{component}' has invalid version '{version}': {reason}")]
    InvalidVersion {
        component: String,
        version: String,
        reason: String,
    },

    /// Dependency requirement is not valid
    #[error("Component '{component}' has invalid requirement '{requirement}' on '{dependency}': {reason}")]
    InvalidRequirement {
        component: String,
        dependency: String,
        requirement: String,
        reason: String,
    },

    /// Same name and version declared twice
    #[error("Component '{name}' version {version} is declared more than once")]
    Duplicate { name: String, version: String },

    /// Malformed component request
    #[error("Invalid request '{request}': {reason}")]
    InvalidRequest { request: String, reason: String },
}

/// Dependency resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    /// Circular dependency detected
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// No version satisfies every collected requirement
    #[error("Version conflict on '{component}': {}", format_requirements(requirements))]
    VersionConflict {
        component: String,
        requirements: Vec<Requirement>,
    },

    /// Component is not in the catalog
    #[error("Unknown component '{component}' required by {}", required_by.join(", "))]
    UnknownComponent {
        component: String,
        required_by: Vec<String>,
    },

    /// Two selected components declare a conflict
    #[error("Component '{component}' conflicts with '{other}'")]
    ComponentConflict { component: String, other: String },

    /// Hashing a resolved node failed
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// A single requirement collected during resolution, used in conflict reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Who asked for it (`<request>` or `name@version`)
    pub requirer: String,
    /// The version range, as written
    pub range: String,
}

fn format_requirements(requirements: &[Requirement]) -> String {
    requirements
        .iter()
        .map(|r| format!("{} requires '{}'", r.requirer, r.range))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error on a store path
    #[error("Store IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Status record could not be encoded or decoded
    #[error("Corrupt store record '{path}': {error}")]
    Corrupt { path: PathBuf, error: String },

    /// Token does not match the lock on disk
    #[error("Reservation for '{hash}' is no longer held by this token")]
    ReservationLost { hash: String },

    /// Waiting on another reservation took too long
    #[error("Timed out waiting for reservation on '{hash}' held by {holder}")]
    ReservationTimeout { hash: String, holder: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error: error.to_string(),
        }
    }
}

/// Build executor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The container build failed
    #[error("External build failed for '{component}': {message}")]
    ExternalBuildFailed { component: String, message: String },

    /// A dependency the plan marks complete has no artifact tree
    #[error("Artifact of dependency '{dependency}' missing for '{component}' at '{path}'")]
    DependencyArtifactMissing {
        component: String,
        dependency: String,
        path: PathBuf,
    },

    /// Preparing the build context failed
    #[error("Failed to prepare build context at '{path}': {error}")]
    Context { path: PathBuf, error: String },
}

/// A file claimed by two components during assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactConflict {
    /// Path relative to the assembly root
    pub path: PathBuf,
    /// Component that placed the file first
    pub first: String,
    /// Component that tried to replace it
    pub second: String,
}

/// Output assembly errors
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// Unmarked files collide
    #[error("{} conflicting file(s): {}", conflicts.len(), format_conflicts(conflicts))]
    ArtifactConflict { conflicts: Vec<ArtifactConflict> },

    /// A node needed for assembly has no complete store entry
    #[error("Component '{component}' ({hash}) is not complete in the store")]
    Incomplete { component: String, hash: String },

    /// Destination already holds something
    #[error("Output directory '{path}' is not empty and holds no earlier weaver output")]
    OutputNotEmpty { path: PathBuf },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

fn format_conflicts(conflicts: &[ArtifactConflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("{} ({} vs {})", c.path.display(), c.first, c.second))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    Read { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    Parse { path: String, error: String },

    /// Failed to write config file
    #[error("Failed to write config file '{path}': {error}")]
    Write { path: String, error: String },
}

/// Top-level weaver error type
#[derive(Error, Debug)]
pub enum WeaverError {
    /// Catalog error
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Resolver error
    #[error("Resolution failed: {0}")]
    Resolver(#[from] ResolverError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Assembly error
    #[error("Assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// One or more plan nodes failed
    #[error("Build failed: {failed} failed, {blocked} blocked, {cancelled} cancelled")]
    BuildFailed {
        failed: usize,
        blocked: usize,
        cancelled: usize,
    },

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

/// Process exit codes, one per failure category
pub mod exit_code {
    /// Usage, configuration or any other failure
    pub const GENERAL: i32 = 1;
    /// Catalog or resolution failure
    pub const RESOLUTION: i32 = 2;
    /// Build or assembly failure
    pub const BUILD: i32 = 3;
    /// Store corruption or store IO failure
    pub const STORE: i32 = 4;
}

impl WeaverError {
    /// Exit code for this error's category
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Catalog(_) | Self::Resolver(_) => exit_code::RESOLUTION,
            Self::BuildFailed { .. } | Self::Assembly(_) => exit_code::BUILD,
            Self::Store(_) => exit_code::STORE,
            Self::Config(_) | Self::Generic(_) => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_every_member() {
        let err = ResolverError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
    }

    #[test]
    fn test_version_conflict_message_names_requirers() {
        let err = ResolverError::VersionConflict {
            component: "dep".into(),
            requirements: vec![
                Requirement {
                    requirer: "x@1.0.0".into(),
                    range: ">=2".into(),
                },
                Requirement {
                    requirer: "y@1.0.0".into(),
                    range: "<2".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("x@1.0.0 requires '>=2'"));
        assert!(msg.contains("y@1.0.0 requires '<2'"));
    }

    #[test]
    fn test_exit_codes_distinguish_categories() {
        let resolution = WeaverError::Resolver(ResolverError::CyclicDependency { cycle: vec![] });
        let build = WeaverError::BuildFailed {
            failed: 1,
            blocked: 0,
            cancelled: 0,
        };
        let store = WeaverError::Store(StoreError::ReservationLost { hash: "ab".into() });

        assert_eq!(resolution.exit_code(), exit_code::RESOLUTION);
        assert_eq!(build.exit_code(), exit_code::BUILD);
        assert_eq!(store.exit_code(), exit_code::STORE);
        assert_ne!(resolution.exit_code(), build.exit_code());
    }
}
