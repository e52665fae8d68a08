//! CLI-specific functionality
//!
//! This module contains all CLI-related code including argument parsing,
//! configuration discovery and the command handlers.

pub mod args;
pub mod commands;
pub mod config;

pub use args::{Args, Commands};
pub use commands::run;
pub use config::ConfigDiscovery;
