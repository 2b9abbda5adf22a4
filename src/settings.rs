//! Server settings consumed by the operation processor.
//!
//! Settings are read-only for the lifetime of a request. They are loaded
//! through figment so deployments can layer a TOML file and `BANYAN_`
//! environment variables over the defaults.

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of results per outbound frame.
pub const DEFAULT_RESULT_ITERATION_BATCH_SIZE: usize = 64;
/// Default budget in milliseconds for producing and writing one response.
pub const DEFAULT_SERIALIZED_RESPONSE_TIMEOUT_MS: u64 = 30_000;

/// Environment variable prefix recognized by [`Settings::load`].
pub const ENV_PREFIX: &str = "BANYAN_";

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A provider failed or the merged configuration did not deserialize.
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

/// Read-only server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Results per outbound frame unless the request overrides it.
    pub result_iteration_batch_size: usize,
    /// Milliseconds budgeted for serializing and writing one response.
    pub serialized_response_timeout: u64,
    /// Scope transactions to the request's alias mapping rather than all
    /// managed graphs.
    pub strict_transaction_management: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            result_iteration_batch_size: DEFAULT_RESULT_ITERATION_BATCH_SIZE,
            serialized_response_timeout: DEFAULT_SERIALIZED_RESPONSE_TIMEOUT_MS,
            strict_transaction_management: false,
        }
    }
}

impl Settings {
    /// Load settings from `banyan.toml` (if present) and the environment.
    ///
    /// # Errors
    /// Returns an error if a provider fails or a value cannot be
    /// deserialized into the expected type.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(Path::new("banyan.toml"))
    }

    /// Load settings from the given TOML file (if present) and the
    /// environment.
    ///
    /// # Errors
    /// Returns an error if a provider fails or a value cannot be
    /// deserialized into the expected type.
    pub fn load_from(config_file: &Path) -> Result<Self, SettingsError> {
        let settings = Figment::new()
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)?;
        Ok(settings)
    }

    /// The serialization budget as a [`Duration`].
    #[must_use]
    pub const fn serialized_response_timeout(&self) -> Duration {
        Duration::from_millis(self.serialized_response_timeout)
    }
}
