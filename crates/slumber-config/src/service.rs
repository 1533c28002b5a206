// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON config service over a [`ConfigStore`].

use serde::{de::DeserializeOwned, Serialize};
use slumber_core::{EngineConfig, ENGINE_CONFIG_KEY};
use tracing::debug;

use crate::store::{validate_key, ConfigError, ConfigStore};

/// Serializes config values as JSON and delegates storage to a store.
#[derive(Debug, Clone)]
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Borrow the inner store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Loads the value under `key`; `Ok(None)` when missing or empty.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        validate_key(key)?;
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Loads the value under `key`, falling back to `T::default()`.
    pub fn load_or_default<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        Ok(self.load(key)?.unwrap_or_default())
    }

    /// Serializes and stores `value` under `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        validate_key(key)?;
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Engine tuning, defaulted when nothing is stored.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = self.load_or_default(ENGINE_CONFIG_KEY)?;
        debug!(
            dwell_ms = config.deep_idle_dwell_ms,
            maximal = config.maximal_deactivation,
            "engine config loaded"
        );
        Ok(config)
    }

    /// Persists engine tuning.
    pub fn save_engine_config(&self, config: &EngineConfig) -> Result<(), ConfigError> {
        self.save(ENGINE_CONFIG_KEY, config)
    }
}
