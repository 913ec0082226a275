use std::sync::atomic::{AtomicUsize, Ordering};

use log::{info, warn};
use serde::Deserialize;

use crate::error::EngineError;
use crate::evaluation::cache::{
    DEFAULT_HASH_CACHE_SIZE_LIMIT, DEFAULT_VALUE_CACHE_MEMORY_LIMIT, ValueCache,
};
use crate::task;

pub const CACHE_MEMORY_LIMIT_VAR: &str = "PLUGFLOW_CACHE_MEMORY_LIMIT";
pub const HASH_CACHE_SIZE_LIMIT_VAR: &str = "PLUGFLOW_HASH_CACHE_SIZE_LIMIT";
pub const BACKGROUND_THREADS_VAR: &str = "PLUGFLOW_BACKGROUND_THREADS";

static HASH_CACHE_SIZE_LIMIT: AtomicUsize = AtomicUsize::new(DEFAULT_HASH_CACHE_SIZE_LIMIT);

/// Entry limit for the hash caches of graphs created from now on.
pub fn hash_cache_size_limit() -> usize {
    HASH_CACHE_SIZE_LIMIT.load(Ordering::Relaxed)
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes of computed values kept in the shared value cache.
    pub value_cache_memory_limit: usize,
    /// Entries kept in each graph's hash cache.
    pub hash_cache_size_limit: usize,
    pub background_threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            value_cache_memory_limit: DEFAULT_VALUE_CACHE_MEMORY_LIMIT,
            hash_cache_size_limit: DEFAULT_HASH_CACHE_SIZE_LIMIT,
            background_threads: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from variables found by `lookup`, normally
    /// `|name| std::env::var(name).ok()`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_var(&lookup, CACHE_MEMORY_LIMIT_VAR)? {
            self.value_cache_memory_limit = value;
        }
        if let Some(value) = parse_var(&lookup, HASH_CACHE_SIZE_LIMIT_VAR)? {
            self.hash_cache_size_limit = value;
        }
        if let Some(value) = parse_var(&lookup, BACKGROUND_THREADS_VAR)? {
            self.background_threads = Some(value);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.hash_cache_size_limit == 0 {
            return Err(EngineError::Config(
                "hash_cache_size_limit must be greater than zero".to_string(),
            ));
        }
        if self.background_threads == Some(0) {
            return Err(EngineError::Config(
                "background_threads must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies the configuration to process-wide state.
    pub fn apply(&self) {
        ValueCache::shared().set_max_cost(self.value_cache_memory_limit);
        HASH_CACHE_SIZE_LIMIT.store(self.hash_cache_size_limit, Ordering::Relaxed);
        if let Some(threads) = self.background_threads {
            if !task::configure_background_threads(threads) {
                warn!("Background pool already running; ignoring background_threads = {}", threads);
            }
        }
        info!(
            "Value cache limit {} bytes, hash cache limit {} entries",
            self.value_cache_memory_limit, self.hash_cache_size_limit
        );
    }
}

fn parse_var<F>(lookup: &F, name: &str) -> Result<Option<usize>, EngineError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| EngineError::Config(format!("{} = \"{}\" : {}", name, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_fields_use_defaults() {
        let config = EngineConfig::from_json(r#"{ "background_threads": 2 }"#).unwrap();
        assert_eq!(config.value_cache_memory_limit, DEFAULT_VALUE_CACHE_MEMORY_LIMIT);
        assert_eq!(config.hash_cache_size_limit, DEFAULT_HASH_CACHE_SIZE_LIMIT);
        assert_eq!(config.background_threads, Some(2));
    }

    #[test]
    fn environment_overrides_json() {
        let vars: HashMap<&str, &str> = [(CACHE_MEMORY_LIMIT_VAR, "2048"), (HASH_CACHE_SIZE_LIMIT_VAR, " 16 ")]
            .into_iter()
            .collect();
        let config = EngineConfig::default()
            .with_env_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.value_cache_memory_limit, 2048);
        assert_eq!(config.hash_cache_size_limit, 16);
        assert_eq!(config.background_threads, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            EngineConfig::default().with_env_overrides(|_| Some("lots".to_string())),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{ "hash_cache_size_limit": 0 }"#),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(EngineConfig::from_json("{"), Err(EngineError::Json(_))));
    }
}
