//! Shared infrastructure for the gas analyzer tools
//!
//! - layered configuration loading (defaults, YAML, environment)
//! - logging setup
//! - shutdown signal handling

pub mod config_loader;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use config_loader::load_config;
pub use error::{Error, Result};
pub use logging::LogConfig;
