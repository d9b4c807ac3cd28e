//! Pipeline Configuration Module
//!
//! Dataset locations, trajectory layout and scaler paths loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `TRAJPREP_CONFIG` environment variable (path to TOML file)
//! 3. `trajprep.toml` in the current working directory
//! 4. Built-in defaults
//!
//! Subcommands receive the config by reference.

mod pipeline_config;
pub mod validation;

pub use pipeline_config::*;
