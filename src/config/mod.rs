//! Configuration and constants
//!
//! - [`defaults`] - Default values used when neither the config file nor
//!   the command line sets them

pub mod defaults;
