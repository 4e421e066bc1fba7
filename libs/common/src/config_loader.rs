//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`<PREFIX>KEY`, nested keys split on `__`)
//! 2. YAML file
//! 3. `Default` values of the target type

use crate::error::{Error, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Build the figment for `T` without extracting it
pub fn figment_for<T>(path: &Path, env_prefix: &str) -> Figment
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if path.exists() {
        info!("Config: {}", path.display());
        figment = figment.merge(Yaml::file(path));
    } else {
        warn!("Config file {} not found, using defaults", path.display());
    }

    figment.merge(Env::prefixed(env_prefix).split("__"))
}

/// Load `T` from defaults, the YAML file at `path` (if present) and the
/// environment
pub fn load_config<T>(path: &Path, env_prefix: &str) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    figment_for::<T>(path, env_prefix)
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))
}
