use std::sync::Arc;

use serde::Deserialize;

use crate::KeyPolicy;

/// Configuration of a single [`ObjectCache`](crate::ObjectCache).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// The name of the cache, used for logs, metrics and error messages.
    pub name: Arc<str>,
    /// How object names are normalized into lookup keys.
    pub key_policy: KeyPolicy,
}

impl CacheConfig {
    /// Creates a config with the given name and exact name matching.
    pub fn named(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            key_policy: KeyPolicy::Exact,
        }
    }

    /// Sets the [`KeyPolicy`].
    pub fn with_key_policy(mut self, key_policy: KeyPolicy) -> Self {
        self.key_policy = key_policy;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::named("objects")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config() {
        let cfg: CacheConfig = serde_yaml::from_str("name: settings\nkey_policy: lowercase").unwrap();
        assert_eq!(&*cfg.name, "settings");
        assert_eq!(cfg.key_policy, KeyPolicy::Lowercase);

        let cfg: CacheConfig = serde_yaml::from_str("name: tables").unwrap();
        assert_eq!(cfg.key_policy, KeyPolicy::Exact);
    }
}
