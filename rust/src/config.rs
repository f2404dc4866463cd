//! Configuration loader. Settings come from a JSON file whose path is taken
//! from `MOBILE_AUTH_CONFIG`; a missing file means every default applies. The
//! signing secret itself is never read from this file, only the name of the
//! environment variable an operator may pin it with.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::crypto::entropy::MIN_SECRET_BYTES;
use crate::provisioner::{ProvisionerOptions, SecretEncoding, DEFAULT_SECRET_BYTES, DEFAULT_SECRET_KEY};
use crate::tokens::DEFAULT_TOKEN_TTL_SECS;

pub const CONFIG_PATH_ENV: &str = "MOBILE_AUTH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "mobile-auth.json";
pub const DEFAULT_OVERRIDE_ENV: &str = "JWT_AUTH_SECRET_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(String),
    #[error("config parse failed: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct MobileAuthConfig {
    /// JSON file backing the option store.
    pub store_path: PathBuf,
    /// Option key holding the signing secret.
    pub secret_key: String,
    /// Random bytes drawn for a new secret.
    pub secret_bytes: usize,
    pub secret_encoding: SecretEncoding,
    /// Environment variable that pins the secret; `null` disables pinning.
    pub override_env: Option<String>,
    /// `iss` claim for issued tokens, usually the site URL.
    pub issuer: String,
    pub token_ttl_secs: u64,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for MobileAuthConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("options.json"),
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            secret_bytes: DEFAULT_SECRET_BYTES,
            secret_encoding: SecretEncoding::Raw,
            override_env: Some(DEFAULT_OVERRIDE_ENV.to_string()),
            issuer: "http://localhost".to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            log_filter: "info".to_string(),
        }
    }
}

impl MobileAuthConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::Invalid("secretKey must not be empty".to_string()));
        }
        if self.secret_bytes < MIN_SECRET_BYTES {
            return Err(ConfigError::Invalid(format!(
                "secretBytes must be at least {MIN_SECRET_BYTES}, got {}",
                self.secret_bytes
            )));
        }
        if self.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid("tokenTtlSecs must be positive".to_string()));
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid("issuer must not be empty".to_string()));
        }
        Ok(())
    }

    /// Provisioner settings, with the pinned secret read from the environment.
    pub fn provisioner_options(&self) -> ProvisionerOptions {
        let override_secret = self
            .override_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|value| !value.is_empty());

        ProvisionerOptions {
            secret_key: self.secret_key.clone(),
            secret_bytes: self.secret_bytes,
            encoding: self.secret_encoding,
            override_secret,
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Path from `MOBILE_AUTH_CONFIG`, or `mobile-auth.json` in the working directory.
pub fn config_path_from_env() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Loads and validates the configuration file. A file that does not exist
/// yields the defaults; any other read failure is an error.
pub fn load_config(path: impl AsRef<Path>) -> Result<MobileAuthConfig, ConfigError> {
    let path = path.as_ref();
    let config = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<MobileAuthConfig>(&raw)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?,
        Err(e) if e.kind() == ErrorKind::NotFound => MobileAuthConfig::default(),
        Err(e) => return Err(ConfigError::Io(format!("{}: {e}", path.display()))),
    };
    config.validate()?;
    Ok(config)
}
