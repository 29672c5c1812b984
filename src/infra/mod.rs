//! Infrastructure layer
//!
//! Handles all I/O with side effects outside the process: the on-disk store
//! and the container engine.

pub mod container;
pub mod dirs;
pub mod dockerfile;
pub mod executor;
pub mod store;
