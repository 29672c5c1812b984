//! Core build logic
//!
//! # Submodules
//!
//! - [`component`] - Component specs, flags, recipes and dependency declarations
//! - [`catalog`] - Catalog loading and component requests
//! - [`version`] - Version and range parsing
//! - [`target`] - Target triplets
//! - [`hasher`] - Content hashing of resolved configurations
//! - [`plan`] - Build plans
//! - [`resolver`] - Version selection, cycle detection and plan construction
//! - [`orchestrator`] - Bounded parallel builds over a plan
//! - [`assemble`] - Output assembly from the store
//! - [`config`] - User configuration file

pub mod assemble;
pub mod catalog;
pub mod component;
pub mod config;
pub mod hasher;
pub mod orchestrator;
pub mod plan;
pub mod resolver;
pub mod target;
pub mod version;
