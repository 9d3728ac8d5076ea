//! Service-wide configuration.
//!
//! A flat struct with a `validate()` pass and an `from_env()` constructor
//! that falls back to documented defaults when a variable is absent or
//! malformed.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;

/// Cluster-discovery parameters (C10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub sample_size: usize,
    pub max_clusters: usize,
    pub min_cluster_size: usize,
    pub min_similarity: f32,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            sample_size: 500,
            max_clusters: 10,
            min_cluster_size: 5,
            min_similarity: 0.7,
        }
    }
}

/// Archive embedding parameters (C9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingParams {
    pub batch_size: usize,
    pub min_word_count: usize,
}

impl Default for EmbeddingParams {
    fn default() -> Self {
        Self {
            batch_size: 50,
            min_word_count: 7,
        }
    }
}

/// Aggregate configuration for the whole service, enumerated in full in the
/// external interfaces section: session capacity/TTL, cost tracking, agent
/// defaults, persona rewrite passes, book assembly defaults, and the C9/C10
/// parameter groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UaosConfig {
    pub max_sessions: usize,
    pub session_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
    pub enable_cost_tracking: bool,
    pub cost_retention_days: u32,
    pub default_tier_id: String,
    pub max_steps_default: u32,
    pub rewrite_passes: u32,
    pub max_passages_default: usize,
    pub cluster: ClusterParams,
    pub embedding: EmbeddingParams,
}

impl Default for UaosConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            session_timeout_ms: 30 * 60 * 1000,
            cleanup_interval_ms: 60 * 1000,
            enable_cost_tracking: true,
            cost_retention_days: 90,
            default_tier_id: "free".to_string(),
            max_steps_default: 10,
            rewrite_passes: 3,
            max_passages_default: 50,
            cluster: ClusterParams::default(),
            embedding: EmbeddingParams::default(),
        }
    }
}

impl UaosConfig {
    /// Reject configurations that would make the service un-runnable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be > 0".into()));
        }
        if self.session_timeout_ms == 0 {
            return Err(ConfigError::Invalid("session_timeout_ms must be > 0".into()));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(ConfigError::Invalid("cleanup_interval_ms must be > 0".into()));
        }
        if self.default_tier_id.trim().is_empty() {
            return Err(ConfigError::Invalid("default_tier_id must not be empty".into()));
        }
        if self.max_steps_default == 0 {
            return Err(ConfigError::Invalid("max_steps_default must be > 0".into()));
        }
        if self.max_passages_default == 0 {
            return Err(ConfigError::Invalid("max_passages_default must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.cluster.min_similarity) {
            return Err(ConfigError::Invalid(
                "cluster.min_similarity must be within [0,1]".into(),
            ));
        }
        if self.cluster.min_cluster_size == 0 {
            return Err(ConfigError::Invalid(
                "cluster.min_cluster_size must be > 0".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be > 0".into()));
        }
        Ok(())
    }

    /// Build from environment variables, falling back to defaults for
    /// anything absent or unparseable. Unlike `validate`, this never fails —
    /// a malformed env var is logged and the default is used instead.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_sessions: env_parse_or("UAOS_MAX_SESSIONS", defaults.max_sessions),
            session_timeout_ms: env_parse_or("UAOS_SESSION_TIMEOUT_MS", defaults.session_timeout_ms),
            cleanup_interval_ms: env_parse_or(
                "UAOS_CLEANUP_INTERVAL_MS",
                defaults.cleanup_interval_ms,
            ),
            enable_cost_tracking: env_parse_or(
                "UAOS_ENABLE_COST_TRACKING",
                defaults.enable_cost_tracking,
            ),
            cost_retention_days: env_parse_or(
                "UAOS_COST_RETENTION_DAYS",
                defaults.cost_retention_days,
            ),
            default_tier_id: env::var("UAOS_DEFAULT_TIER_ID").unwrap_or(defaults.default_tier_id),
            max_steps_default: env_parse_or("UAOS_MAX_STEPS_DEFAULT", defaults.max_steps_default),
            rewrite_passes: env_parse_or("UAOS_REWRITE_PASSES", defaults.rewrite_passes),
            max_passages_default: env_parse_or(
                "UAOS_MAX_PASSAGES_DEFAULT",
                defaults.max_passages_default,
            ),
            cluster: defaults.cluster,
            embedding: defaults.embedding,
        }
    }
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
