//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::error::{exit_code, CatalogError, ResolverError, StoreError, WeaverError};
use commands::Commands;

/// Weaver - content-addressed builds for cross toolchains
///
/// Resolves component catalogs into build plans, builds each component once
/// per configuration inside containers, and assembles the results.
#[derive(Parser, Debug)]
#[command(name = "weaver")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Store root
    #[arg(long, global = true, env = "WEAVER_STORE_DIR", value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Config file (default: config.toml in the config directory)
    #[arg(long, global = true, env = "WEAVER_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Options shared by every command
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub store: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        let global = GlobalOptions {
            store: self.store,
            config: self.config,
        };

        if let Some(cmd) = self.command {
            cmd.run(&global).await
        } else {
            // No subcommand provided, show help
            use clap::CommandFactory;
            let mut cmd = Self::command();
            cmd.print_help()?;
            Ok(())
        }
    }
}

/// Process exit code for a failed command
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    if let Some(weaver) = error.downcast_ref::<WeaverError>() {
        return weaver.exit_code();
    }
    for cause in error.chain() {
        if cause.is::<CatalogError>() || cause.is::<ResolverError>() {
            return exit_code::RESOLUTION;
        }
        if cause.is::<StoreError>() {
            return exit_code::STORE;
        }
    }
    exit_code::GENERAL
}
