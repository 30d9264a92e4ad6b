//! Config file loading for `courier`.
//!
//! # Example
//!
//! ```toml
//! [transport]
//! base_url = "https://www.example.com"
//! ping_url = "https://www.example.com/api/Ping"
//!
//! [retry]
//! max_attempts = 5
//!
//! [logging]
//! redacted_params = ["authToken", "password"]
//! ```
//!
//! Missing sections take their defaults. `COURIER_BASE_URL` and
//! `COURIER_AUTH_TOKEN` override the file.

use std::path::Path;

use courier_dispatch::{ClientConfig, ConfigError};

/// Load `path` (or defaults when `None`), then apply env overrides.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            parse_config(&content)?
        }
        None => ClientConfig::default(),
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<ClientConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
}
