//! Engine configuration.
//!
//! ```ignore
//! let config = EngineConfig::from_env().with_cache_capacity(8);
//! let registry = Registry::from_config(&config);
//! ```

use std::path::{Path, PathBuf};

/// Environment variable naming the artifact root directory.
pub const ARTIFACT_DIR_ENV: &str = "TOKENLENS_ARTIFACT_DIR";

/// Environment variable bounding the number of cached vocabularies.
pub const CACHE_CAPACITY_ENV: &str = "TOKENLENS_CACHE_CAPACITY";

/// Default number of parsed vocabularies kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory holding `tiktoken/` and `hf/` artifact trees.
    pub artifact_root: PathBuf,
    /// Maximum number of vocabularies the store keeps resident.
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("artifacts"),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the process environment, falling back to
    /// defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os(ARTIFACT_DIR_ENV) {
            config.artifact_root = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var(CACHE_CAPACITY_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.cache_capacity = capacity,
                _ => tracing::warn!(value = %raw, "ignoring invalid {}", CACHE_CAPACITY_ENV),
            }
        }
        config
    }

    pub fn with_artifact_root(mut self, root: impl AsRef<Path>) -> Self {
        self.artifact_root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.artifact_root, PathBuf::from("artifacts"));
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn test_builder_clamps_capacity() {
        let config = EngineConfig::default()
            .with_artifact_root("/tmp/vocab")
            .with_cache_capacity(0);
        assert_eq!(config.artifact_root, PathBuf::from("/tmp/vocab"));
        assert_eq!(config.cache_capacity, 1);
    }
}
