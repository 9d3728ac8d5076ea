//! Model-rate catalog (C8): a declarative `{modelId -> rate}` table plus a
//! local-model prefix list and a default fallback rate, mirrored from
//! `spec.md` §4.7/§6 ("Model-rate catalog ships as data").
//!
//! Uses the same "small static table + documented fallback" shape applied
//! to other default-constant tables in this workspace; pricing itself has
//! no direct precedent elsewhere since calls are billed here rather than
//! by the adapters that place them.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Per-million-token rate, in integer-friendly cents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRate {
    pub in_cents_per_1m: f64,
    pub out_cents_per_1m: f64,
}

impl ModelRate {
    pub const fn new(in_cents_per_1m: f64, out_cents_per_1m: f64) -> Self {
        Self { in_cents_per_1m, out_cents_per_1m }
    }

    pub const ZERO: Self = Self::new(0.0, 0.0);
}

/// Prefixes identifying locally-hosted models, priced at zero per spec §4.7.
const LOCAL_MODEL_PREFIXES: &[&str] = &["ollama/", "local/", "llama.cpp/"];

/// Fallback rate applied to any model id not present in [`CATALOG`] and not
/// matching a local prefix. Kept explicit and separately named (rather than
/// folded silently into the lookup) so tests can assert an unpriced model
/// actually falls back instead of being priced as if catalogued.
pub const DEFAULT_RATE: ModelRate = ModelRate::new(300.0, 1500.0);

static CATALOG: Lazy<BTreeMap<&'static str, ModelRate>> = Lazy::new(|| {
    let mut m = BTreeMap::new();
    m.insert("claude-opus-4", ModelRate::new(1500.0, 7500.0));
    m.insert("claude-sonnet", ModelRate::new(300.0, 1500.0));
    m.insert("claude-sonnet-4", ModelRate::new(300.0, 1500.0));
    m.insert("claude-haiku", ModelRate::new(80.0, 400.0));
    m.insert("gpt-4o", ModelRate::new(250.0, 1000.0));
    m.insert("gpt-4o-mini", ModelRate::new(15.0, 60.0));
    m.insert("text-embedding-3-small", ModelRate::new(2.0, 0.0));
    m.insert("text-embedding-3-large", ModelRate::new(13.0, 0.0));
    m
});

/// Outcome of a rate lookup, distinguishing a catalogued hit from the
/// fallback so callers can log unpriced-model usage per the design note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLookup {
    Local,
    Catalogued(ModelRate),
    Fallback(ModelRate),
}

impl RateLookup {
    pub fn rate(&self) -> ModelRate {
        match self {
            RateLookup::Local => ModelRate::ZERO,
            RateLookup::Catalogued(r) | RateLookup::Fallback(r) => *r,
        }
    }
}

/// Look up the rate for `model`, applying the local-prefix zero-rate rule
/// before consulting the catalog, and falling back to [`DEFAULT_RATE`] for
/// anything unrecognized.
pub fn lookup_rate(model: &str) -> RateLookup {
    if LOCAL_MODEL_PREFIXES.iter().any(|p| model.starts_with(p)) {
        return RateLookup::Local;
    }
    match CATALOG.get(model) {
        Some(rate) => RateLookup::Catalogued(*rate),
        None => {
            tracing::warn!(model, "no catalogued rate for model, using default fallback rate");
            RateLookup::Fallback(DEFAULT_RATE)
        }
    }
}

/// `cost_cents = (inputTokens * rate.inCentsPer1M + outputTokens * rate.outCentsPer1M) / 1_000_000`.
pub fn cost_cents(input_tokens: i64, output_tokens: i64, model: &str) -> f64 {
    let rate = lookup_rate(model).rate();
    (input_tokens as f64 * rate.in_cents_per_1m + output_tokens as f64 * rate.out_cents_per_1m) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_model_prefix_is_zero_rate() {
        assert_eq!(lookup_rate("ollama/llama3"), RateLookup::Local);
        assert_eq!(cost_cents(1_000_000, 1_000_000, "ollama/llama3"), 0.0);
    }

    #[test]
    fn catalogued_model_uses_its_own_rate() {
        assert_eq!(lookup_rate("claude-sonnet"), RateLookup::Catalogued(ModelRate::new(300.0, 1500.0)));
    }

    #[test]
    fn unknown_model_falls_back_to_default_rate() {
        assert_eq!(lookup_rate("some-future-model"), RateLookup::Fallback(DEFAULT_RATE));
    }

    #[test]
    fn cost_cents_matches_spec_formula() {
        // 600 in + 500 out tokens against claude-sonnet (300/1500 per 1M).
        let cost = cost_cents(600, 500, "claude-sonnet");
        let expected = (600.0 * 300.0 + 500.0 * 1500.0) / 1_000_000.0;
        assert!((cost - expected).abs() < 1e-9);
    }
}
