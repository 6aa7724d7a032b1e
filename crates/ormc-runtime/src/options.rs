//! Session configuration.

use serde::{Deserialize, Serialize};

/// Lifetime of the identity cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Loaded objects stay cached, strongly referenced, for the life of the
    /// session or until rollback.
    #[default]
    Session,
    /// The cache only lives for one top-level call.
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Starting buffer size for variable-length image slots.
    pub initial_capacity: usize,
    /// Largest buffer a slot may grow to.
    pub max_capacity: usize,
    pub cache_mode: CacheMode,
    /// Statements kept prepared for distinct query conditions. Past this,
    /// the least recently used one is finalized.
    pub max_query_statements: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            initial_capacity: 256,
            max_capacity: 16 * 1024 * 1024,
            cache_mode: CacheMode::Session,
            max_query_statements: 64,
        }
    }
}
