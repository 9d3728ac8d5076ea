//! Default tier catalog (C8): the built-in `{free, pro, enterprise}` bundle
//! the Admin Plane initializes from on startup, per spec.md §3/§4.7.

use std::collections::BTreeSet;
use uaos_types::{TierLimits, UserTier};

/// The id of the tier that may never be deleted (spec.md §4.7: "free tier
/// is undeletable").
pub const FREE_TIER_ID: &str = "free";

fn models(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn features(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// The built-in tier catalog a fresh Admin Plane ships with.
pub fn default_tier_catalog() -> Vec<UserTier> {
    vec![
        UserTier {
            id: FREE_TIER_ID.to_string(),
            name: "Free".to_string(),
            limits: TierLimits {
                tokens_per_day: 10_000,
                tokens_per_month: 200_000,
                requests_per_minute: 5,
                max_concurrent_tasks: 1,
            },
            allowed_models: models(&["claude-haiku", "gpt-4o-mini"]),
            features: features(&["buffers", "search"]),
            priority: 0,
            public: true,
        },
        UserTier {
            id: "pro".to_string(),
            name: "Pro".to_string(),
            limits: TierLimits {
                tokens_per_day: 500_000,
                tokens_per_month: 10_000_000,
                requests_per_minute: 60,
                max_concurrent_tasks: 5,
            },
            allowed_models: models(&["claude-sonnet", "claude-sonnet-4", "claude-haiku", "gpt-4o", "gpt-4o-mini"]),
            features: features(&["buffers", "search", "agent", "books"]),
            priority: 10,
            public: true,
        },
        UserTier {
            id: "enterprise".to_string(),
            name: "Enterprise".to_string(),
            limits: TierLimits {
                tokens_per_day: 10_000_000,
                tokens_per_month: 250_000_000,
                requests_per_minute: 600,
                max_concurrent_tasks: 50,
            },
            allowed_models: models(&[
                "claude-opus-4",
                "claude-sonnet",
                "claude-sonnet-4",
                "claude-haiku",
                "gpt-4o",
                "gpt-4o-mini",
            ]),
            features: features(&["buffers", "search", "agent", "books", "clusters", "personas"]),
            priority: 20,
            public: true,
        },
    ]
}
