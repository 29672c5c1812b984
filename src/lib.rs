//! Weaver - content-addressed build orchestrator for cross toolchains
//!
//! Weaver reads a catalog of toolchain components (binutils, glibc, gcc,
//! user packages), resolves requested components into a build plan, hashes
//! every node's full transitive configuration, and builds each hash exactly
//! once into an on-disk store through a container engine. Finished entries
//! are reused across runs and assembled into a target directory.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Catalog, resolution, hashing, orchestration and assembly
//! - [`infra`] - Infrastructure layer (store, container engine, directories)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
