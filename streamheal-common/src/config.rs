//! Configuration file resolution and TOML loading
//!
//! Config file resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/streamheal/config.toml`)
//! 4. None: caller falls back to built-in defaults
//!
//! A missing config file is never fatal. Callers log a warning and
//! continue with defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "STREAMHEAL_CONFIG";

/// Resolve which config file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    let default_path = default_config_path()?;
    if default_path.exists() {
        Some(default_path)
    } else {
        None
    }
}

/// Platform config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("streamheal").join("config.toml"))
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}

/// Load `T` from `path`, or `T::default()` when no path resolved
///
/// An explicitly resolved path that does not exist yields defaults with a
/// warning. A file that exists but fails to parse is an error.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        debug!("No config file resolved, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!("Config file not found: {}, using built-in defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    parse_toml(&content).map_err(|e| match e {
        Error::TomlParse(inner) => {
            Error::Config(format!("{}: {}", path.display(), inner))
        }
        other => other,
    })
}
