//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod gc;
pub mod resolve;
pub mod store;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::GlobalOptions;
use crate::core::catalog::{Catalog, Request};
use crate::core::config::WeaverConfig;
use crate::core::plan::BuildPlan;
use crate::core::resolver;
use crate::core::target::Target;
use crate::error::WeaverError;
use crate::infra::dirs::WeaverDirs;
use crate::infra::store::Store;

/// Catalog file used when `--catalog` is not given
pub const DEFAULT_CATALOG: &str = "weaver.toml";

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve components into a build plan without building
    Resolve {
        /// Catalog file
        #[arg(short, long, default_value = DEFAULT_CATALOG)]
        catalog: PathBuf,

        /// Target architecture or triplet
        #[arg(short, long)]
        target: Option<String>,

        /// Components to resolve (`name` or `name@range`)
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Build components and optionally assemble them
    Build {
        /// Catalog file
        #[arg(short, long, default_value = DEFAULT_CATALOG)]
        catalog: PathBuf,

        /// Target architecture or triplet
        #[arg(short, long)]
        target: Option<String>,

        /// Number of parallel builds
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Assemble the result into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Assemble runtime dependencies only
        #[arg(long, requires = "output")]
        runtime_only: bool,

        /// Build a runtime image with this tag from the assembled rootfs
        #[arg(long, requires = "output", value_name = "TAG")]
        image: Option<String>,

        /// Container engine: docker, podman or auto
        #[arg(long)]
        engine: Option<String>,

        /// Base image for component builds
        #[arg(long)]
        base_image: Option<String>,

        /// Components to build (`name` or `name@range`)
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Remove store entries
    ///
    /// Without options only failed entries are removed. With components,
    /// entries not used by their plan are removed.
    Gc {
        /// Catalog file used to resolve the components to keep
        #[arg(short, long, default_value = DEFAULT_CATALOG)]
        catalog: PathBuf,

        /// Target architecture or triplet for the plan to keep
        #[arg(short, long)]
        target: Option<String>,

        /// Remove every entry that is not reserved
        #[arg(long, conflicts_with_all = ["components", "older_than_days"])]
        all: bool,

        /// Only remove entries unused for this many days
        #[arg(long, value_name = "DAYS")]
        older_than_days: Option<u64>,

        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,

        /// Components whose plan is kept
        components: Vec<String>,
    },

    /// Store subcommands
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
}

/// Store subcommands
#[derive(Subcommand, Debug)]
pub enum StoreCommands {
    /// Show store location, size and entry counts
    Info,

    /// List store entries
    List,
}

impl Commands {
    /// Execute the command
    pub async fn run(self, global: &GlobalOptions) -> Result<()> {
        let session = Session::open(global)?;

        match self {
            Self::Resolve {
                catalog,
                target,
                components,
            } => resolve::execute(&session, &catalog, target.as_deref(), &components),
            Self::Build {
                catalog,
                target,
                jobs,
                output,
                runtime_only,
                image,
                engine,
                base_image,
                components,
            } => {
                build::execute(
                    &session,
                    build::BuildOptions {
                        catalog,
                        target,
                        jobs,
                        output,
                        runtime_only,
                        image,
                        engine,
                        base_image,
                        components,
                    },
                )
                .await
            }
            Self::Gc {
                catalog,
                target,
                all,
                older_than_days,
                dry_run,
                components,
            } => gc::execute(
                &session,
                gc::GcOptions {
                    catalog,
                    target,
                    all,
                    older_than_days,
                    dry_run,
                    components,
                },
            ),
            Self::Store { command } => match command {
                StoreCommands::Info => store::info(&session),
                StoreCommands::List => store::list(&session),
            },
        }
    }
}

/// Configuration and locations shared by the commands
#[derive(Debug, Clone)]
pub struct Session {
    pub config: WeaverConfig,
    pub store_path: PathBuf,
}

impl Session {
    /// Load the config file and work out the store location
    pub fn open(global: &GlobalOptions) -> Result<Self> {
        let dirs = WeaverDirs::new();
        let config_path = global.config.clone().unwrap_or_else(|| dirs.config_path());
        let config = WeaverConfig::load_from_path(&config_path).map_err(WeaverError::from)?;

        let store_path = global
            .store
            .clone()
            .unwrap_or_else(|| config.store_path(&dirs));

        Ok(Self { config, store_path })
    }

    /// Open the store, creating it if needed
    pub fn open_store(&self) -> Result<Store> {
        let store = Store::open(&self.store_path)
            .map_err(WeaverError::from)
            .with_context(|| format!("Failed to open store at {}", self.store_path.display()))?;
        Ok(store.with_stale_after(self.config.stale_after()))
    }

    /// Target from the flag, falling back to the config file and the host
    pub fn target(&self, flag: Option<&str>) -> Result<Target> {
        match flag {
            Some(value) => value
                .parse::<Target>()
                .map_err(|e: String| WeaverError::Generic(format!("Invalid target: {e}")).into()),
            None => Ok(self.config.target()),
        }
    }
}

/// Load a catalog and resolve requests against it
pub fn load_plan(catalog_path: &Path, components: &[String], target: &Target) -> Result<BuildPlan> {
    let catalog = Catalog::load(catalog_path).map_err(WeaverError::from)?;
    let requests = components
        .iter()
        .map(|c| c.parse::<Request>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(WeaverError::from)?;

    tracing::info!(
        "Resolving {} request(s) against '{}' for {}",
        requests.len(),
        catalog_path.display(),
        target
    );
    let plan = resolver::resolve(&requests, &catalog, target).map_err(WeaverError::from)?;
    Ok(plan)
}
