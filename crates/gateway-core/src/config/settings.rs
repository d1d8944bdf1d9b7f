//! Loads [`Settings`] from a JSON configuration file, with environment
//! overrides for the bind address.

use crate::models::settings::Settings;
use std::path::Path;
use thiserror::Error;

const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG_PATH";
const HOST_ENV: &str = "GATEWAY_HOST";
const PORT_ENV: &str = "GATEWAY_PORT";
const DEFAULT_CONFIG_PATH: &str = "gateway.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration is invalid: {0}")]
    Invalid(String),
}

/// Reads settings from the JSON file at `$GATEWAY_CONFIG_PATH` (falling
/// back to `./gateway.json`), then applies `$GATEWAY_HOST`/`$GATEWAY_PORT`
/// overrides and validates the result.
pub fn load_settings() -> Result<Settings, SettingsError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut settings = load_from_path(&path)?;

    if let Ok(host) = std::env::var(HOST_ENV) {
        settings.server.host = host;
    }
    if let Ok(port) = std::env::var(PORT_ENV) {
        settings.server.port = port
            .parse()
            .map_err(|_| SettingsError::Invalid(format!("{PORT_ENV} is not a valid port number")))?;
    }

    settings
        .validate()
        .map_err(SettingsError::Invalid)?;

    Ok(settings)
}

fn load_from_path(path: impl AsRef<Path>) -> Result<Settings, SettingsError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.display().to_string(),
        source,
    })
}
