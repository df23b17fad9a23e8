//! Resolver session context shared by every transporter of one resolution run

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::cache::StateCache;

/// Caller-owned cache whose lifetime spans many transport sessions.
///
/// The transport only stores its [`StateCache`] here; the slot is filled by
/// the first session that asks for it and reused by every later one.
#[derive(Debug, Default)]
pub struct RepositoryCache {
    state: OnceLock<Arc<StateCache>>,
}

impl RepositoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state_cache(&self) -> Arc<StateCache> {
        Arc::clone(self.state.get_or_init(|| {
            tracing::debug!("Creating shared transport state cache");
            Arc::new(StateCache::new())
        }))
    }
}

/// Key/value configuration plus the optional shared cache of a resolution
/// session.
#[derive(Debug, Clone, Default)]
pub struct RepositorySession {
    config: HashMap<String, String>,
    cache: Option<Arc<RepositoryCache>>,
}

impl RepositorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a configuration entry.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Attach a cache shared with other sessions.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<RepositoryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<RepositoryCache>> {
        self.cache.as_ref()
    }

    /// Raw configuration value for `key`.
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// Value of the first key present, as `(key, value)`.
    fn lookup<'a>(&'a self, keys: &[&'a str]) -> Option<(&'a str, &'a str)> {
        keys.iter()
            .find_map(|key| self.config_value(key).map(|value| (*key, value)))
    }

    /// Trimmed value of the first key present, or `default`.
    pub fn get_string(&self, default: &str, keys: &[&str]) -> String {
        self.lookup(keys)
            .map_or_else(|| default.to_string(), |(_, value)| value.trim().to_string())
    }

    /// Numeric value of the first key present. Unparseable values fall back
    /// to `default` with a warning.
    pub fn get_u64(&self, default: u64, keys: &[&str]) -> u64 {
        match self.lookup(keys) {
            Some((key, value)) => value.trim().parse().unwrap_or_else(|_| {
                tracing::warn!("Ignoring non-numeric value {:?} for {}", value, key);
                default
            }),
            None => default,
        }
    }

    /// Boolean value of the first key present, or `default`.
    pub fn get_bool(&self, default: bool, keys: &[&str]) -> bool {
        match self.lookup(keys) {
            Some((key, value)) => value.trim().to_ascii_lowercase().parse().unwrap_or_else(|_| {
                tracing::warn!("Ignoring non-boolean value {:?} for {}", value, key);
                default
            }),
            None => default,
        }
    }
}
