//! Admin Plane (C7) + Cost/Tier Tables (C8): config KV with audit, prompt
//! template CRUD and compilation, cost recording against the rate catalog,
//! per-(user,period) usage aggregation, tier CRUD and assignment, and limit
//! checking.
//!
//! Uses an in-memory-mock-behind-`RwLock` posture (same shape
//! `uaos-session::SessionManager` already uses for its map) for every table
//! this crate owns that the abstract [`uaos_store::Store`] trait does not
//! cover (config KV, prompt templates, tier definitions, and the
//! user->tier assignment — none of those are persisted entities in
//! spec.md §3's data model, only cost entries/usage are). Cost entries and
//! usage aggregates go through `Store` since spec.md §3 lists them as
//! persisted entities.

mod rates;
mod reports;
pub mod tiers;

pub use rates::{cost_cents, lookup_rate, ModelRate, RateLookup, DEFAULT_RATE};
pub use reports::{cost_report, usage_report, CostReport, ReportBucket, ReportOptions, UsageReport};
pub use tiers::{default_tier_catalog, FREE_TIER_ID};

use chrono::{Duration, Utc};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::instrument;
use uaos_store::Store;
use uaos_types::{
    AdminError, ConfigAuditRecord, ExceededLimit, LlmCostEntry, PeriodKind, PromptTemplate,
    Timestamp, UaosConfig, UaosResult, UserId, UserTier, UserUsage, UsageTotals, Value,
};

/// Parameters for [`AdminPlane::record_llm_cost`], mirroring the service
/// API's `recordLlmCost` argument object.
#[derive(Debug, Clone)]
pub struct RecordCostArgs {
    pub user_id: Option<UserId>,
    pub session_id: Option<uaos_types::SessionId>,
    pub model: String,
    pub operation: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_cents: Option<f64>,
    pub latency_ms: i64,
    pub success: bool,
    pub error: Option<String>,
}

/// Result of [`AdminPlane::check_limits`].
#[derive(Debug, Clone)]
pub struct LimitsCheck {
    pub within_limits: bool,
    pub exceeded_limits: Vec<ExceededLimit>,
    pub warnings: Vec<String>,
    pub tier: UserTier,
    pub current_usage: UsageSnapshot,
}

/// The usage figures `check_limits` evaluated against the tier's limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageSnapshot {
    pub tokens_per_day: i64,
    pub tokens_per_month: i64,
    pub requests_per_minute: i64,
    pub concurrent_tasks: i64,
}

struct AdminState {
    config: RwLock<BTreeMap<(String, String), Value>>,
    audit: RwLock<Vec<ConfigAuditRecord>>,
    prompts: RwLock<BTreeMap<String, PromptTemplate>>,
    tiers: RwLock<BTreeMap<String, UserTier>>,
    user_tiers: RwLock<HashMap<UserId, String>>,
}

/// Admin Plane: config KV, prompts, cost/usage accounting, and tier limits.
pub struct AdminPlane {
    store: Arc<dyn Store>,
    state: AdminState,
    enable_cost_tracking: bool,
    default_tier_id: String,
    cost_retention_days: u32,
}

impl AdminPlane {
    pub fn new(store: Arc<dyn Store>, config: &UaosConfig) -> Self {
        let tiers: BTreeMap<String, UserTier> =
            default_tier_catalog().into_iter().map(|t| (t.id.clone(), t)).collect();
        Self {
            store,
            state: AdminState {
                config: RwLock::new(BTreeMap::new()),
                audit: RwLock::new(Vec::new()),
                prompts: RwLock::new(BTreeMap::new()),
                tiers: RwLock::new(tiers),
                user_tiers: RwLock::new(HashMap::new()),
            },
            enable_cost_tracking: config.enable_cost_tracking,
            default_tier_id: config.default_tier_id.clone(),
            cost_retention_days: config.cost_retention_days,
        }
    }

    // ------------------------------------------------------------------
    // Config KV with audit
    // ------------------------------------------------------------------

    pub fn get(&self, category: &str, key: &str) -> UaosResult<Option<Value>> {
        let guard = self.state.config.read().map_err(poisoned)?;
        Ok(guard.get(&(category.to_string(), key.to_string())).cloned())
    }

    pub fn get_or_default(&self, category: &str, key: &str, default: Value) -> UaosResult<Value> {
        Ok(self.get(category, key)?.unwrap_or(default))
    }

    #[instrument(skip(self, value), fields(category, key))]
    pub fn set(
        &self,
        category: &str,
        key: &str,
        value: Value,
        reason: Option<String>,
        changed_by: Option<UserId>,
    ) -> UaosResult<()> {
        let mut guard = self.state.config.write().map_err(poisoned)?;
        guard.insert((category.to_string(), key.to_string()), value.clone());
        drop(guard);
        let mut audit = self.state.audit.write().map_err(poisoned)?;
        audit.push(ConfigAuditRecord {
            category: category.to_string(),
            key: key.to_string(),
            value,
            reason,
            changed_at: Utc::now(),
            changed_by,
        });
        Ok(())
    }

    pub fn audit_log(&self) -> UaosResult<Vec<ConfigAuditRecord>> {
        Ok(self.state.audit.read().map_err(poisoned)?.clone())
    }

    // ------------------------------------------------------------------
    // Prompt templates
    // ------------------------------------------------------------------

    pub fn create_prompt(&self, id: impl Into<String>, name: impl Into<String>, template: impl Into<String>) -> UaosResult<PromptTemplate> {
        let now = Utc::now();
        let prompt = PromptTemplate { id: id.into(), name: name.into(), template: template.into(), created_at: now, updated_at: now };
        self.state.prompts.write().map_err(poisoned)?.insert(prompt.id.clone(), prompt.clone());
        Ok(prompt)
    }

    pub fn get_prompt(&self, id: &str) -> UaosResult<Option<PromptTemplate>> {
        Ok(self.state.prompts.read().map_err(poisoned)?.get(id).cloned())
    }

    pub fn update_prompt(&self, id: &str, template: impl Into<String>) -> UaosResult<PromptTemplate> {
        let mut guard = self.state.prompts.write().map_err(poisoned)?;
        let prompt = guard.get_mut(id).ok_or_else(|| AdminError::NotFound(id.to_string()))?;
        prompt.template = template.into();
        prompt.updated_at = Utc::now();
        Ok(prompt.clone())
    }

    pub fn delete_prompt(&self, id: &str) -> UaosResult<()> {
        self.state.prompts.write().map_err(poisoned)?.remove(id);
        Ok(())
    }

    pub fn list_prompts(&self) -> UaosResult<Vec<PromptTemplate>> {
        Ok(self.state.prompts.read().map_err(poisoned)?.values().cloned().collect())
    }

    /// Substitutes `{{name}}` tokens in the named prompt's template with
    /// `vars`. Unrecognized tokens are left intact.
    pub fn compile(&self, id: &str, vars: &BTreeMap<String, String>) -> UaosResult<String> {
        let prompt = self
            .get_prompt(id)?
            .ok_or_else(|| AdminError::NotFound(id.to_string()))?;
        Ok(substitute_template(&prompt.template, vars))
    }

    /// `test(id, vars)`: identical to [`compile`](Self::compile), kept as a
    /// distinct name per the service API so callers can distinguish
    /// "compile for real use" from "compile to preview" in logs.
    pub fn test(&self, id: &str, vars: &BTreeMap<String, String>) -> UaosResult<String> {
        self.compile(id, vars)
    }

    // ------------------------------------------------------------------
    // Cost recording
    // ------------------------------------------------------------------

    /// Records one LLM call. Derives `cost_cents` from the rate catalog when
    /// the caller doesn't supply one, then updates both the `day` and
    /// `month` buckets of the user's usage aggregate. Returns `None` (and
    /// writes nothing) when cost tracking is disabled.
    #[instrument(skip(self, args), fields(model = %args.model, operation = %args.operation))]
    pub async fn record_llm_cost(&self, args: RecordCostArgs) -> UaosResult<Option<LlmCostEntry>> {
        if !self.enable_cost_tracking {
            return Ok(None);
        }
        let cost_cents = args.cost_cents.unwrap_or_else(|| cost_cents(args.input_tokens, args.output_tokens, &args.model));
        let entry = LlmCostEntry {
            id: uaos_types::ArtifactId::now_v7(),
            timestamp: Utc::now(),
            user_id: args.user_id,
            session_id: args.session_id,
            model: args.model.clone(),
            operation: args.operation.clone(),
            input_tokens: args.input_tokens,
            output_tokens: args.output_tokens,
            cost_cents,
            latency_ms: args.latency_ms,
            success: args.success,
            error: args.error,
        };
        self.store.record_cost_entry(&entry).await?;
        if let Some(user_id) = args.user_id {
            self.bump_usage(user_id, PeriodKind::Day, &entry).await?;
            self.bump_usage(user_id, PeriodKind::Month, &entry).await?;
        }
        Ok(Some(entry))
    }

    async fn bump_usage(&self, user_id: UserId, period_kind: PeriodKind, entry: &LlmCostEntry) -> UaosResult<()> {
        let period = period_kind.key(entry.timestamp);
        let mut usage = self
            .store
            .load_usage(user_id, &period)
            .await?
            .unwrap_or_else(|| UserUsage { user_id, period: period.clone(), ..Default::default() });
        add_to_totals(&mut usage.totals, entry);
        add_to_totals(usage.by_model.entry(entry.model.clone()).or_default(), entry);
        add_to_totals(usage.by_operation.entry(entry.operation.clone()).or_default(), entry);
        self.store.save_usage(&usage).await
    }

    pub async fn get_usage(&self, user_id: UserId, period: &str) -> UaosResult<UserUsage> {
        Ok(self
            .store
            .load_usage(user_id, period)
            .await?
            .unwrap_or_else(|| UserUsage { user_id, period: period.to_string(), ..Default::default() }))
    }

    pub async fn prune_old_cost_entries(&self) -> UaosResult<usize> {
        let cutoff = Utc::now() - Duration::days(self.cost_retention_days as i64);
        self.store.prune_cost_entries_older_than(cutoff).await
    }

    // ------------------------------------------------------------------
    // Tiers
    // ------------------------------------------------------------------

    pub fn list_tiers(&self) -> UaosResult<Vec<UserTier>> {
        Ok(self.state.tiers.read().map_err(poisoned)?.values().cloned().collect())
    }

    pub fn get_tier(&self, id: &str) -> UaosResult<Option<UserTier>> {
        Ok(self.state.tiers.read().map_err(poisoned)?.get(id).cloned())
    }

    pub fn set_tier(&self, tier: UserTier) -> UaosResult<()> {
        self.state.tiers.write().map_err(poisoned)?.insert(tier.id.clone(), tier);
        Ok(())
    }

    pub fn delete_tier(&self, id: &str) -> UaosResult<()> {
        if id == FREE_TIER_ID {
            return Err(AdminError::WrongPhase("cannot delete the free tier".to_string()).into());
        }
        self.state.tiers.write().map_err(poisoned)?.remove(id);
        Ok(())
    }

    pub fn set_user_tier(&self, user_id: UserId, tier_id: &str) -> UaosResult<()> {
        if !self.state.tiers.read().map_err(poisoned)?.contains_key(tier_id) {
            return Err(AdminError::NotFound(format!("unknown tier: {tier_id}")).into());
        }
        self.state.user_tiers.write().map_err(poisoned)?.insert(user_id, tier_id.to_string());
        Ok(())
    }

    pub fn user_tier_id(&self, user_id: UserId) -> UaosResult<String> {
        Ok(self
            .state
            .user_tiers
            .read()
            .map_err(poisoned)?
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| self.default_tier_id.clone()))
    }

    fn user_tier(&self, user_id: UserId) -> UaosResult<UserTier> {
        let id = self.user_tier_id(user_id)?;
        self.get_tier(&id)?.ok_or_else(|| AdminError::NotFound(id).into())
    }

    pub fn is_model_allowed(&self, tier_id: &str, model: &str) -> UaosResult<bool> {
        let tier = self.get_tier(tier_id)?.ok_or_else(|| AdminError::NotFound(tier_id.to_string()))?;
        Ok(tier.allowed_models.contains(model))
    }

    // ------------------------------------------------------------------
    // Limits
    // ------------------------------------------------------------------

    /// `checkLimits(userId) -> {withinLimits, exceededLimits[], warnings[], tier, currentUsage}`.
    /// `active_tasks` is supplied by the caller (the agent-loop owner), since
    /// concurrent-task counting is outside this crate's data model.
    #[instrument(skip(self))]
    pub async fn check_limits(&self, user_id: UserId, active_tasks: i64) -> UaosResult<LimitsCheck> {
        let tier = self.user_tier(user_id)?;
        let now = Utc::now();
        let day_usage = self.get_usage(user_id, &PeriodKind::Day.key(now)).await?;
        let month_usage = self.get_usage(user_id, &PeriodKind::Month.key(now)).await?;
        let requests_per_minute = self.rolling_request_count(user_id, now).await?;

        let snapshot = UsageSnapshot {
            tokens_per_day: day_usage.totals.tokens_used,
            tokens_per_month: month_usage.totals.tokens_used,
            requests_per_minute,
            concurrent_tasks: active_tasks,
        };

        let checks: [(&str, i64, i64); 4] = [
            ("tokensPerDay", snapshot.tokens_per_day, tier.limits.tokens_per_day),
            ("tokensPerMonth", snapshot.tokens_per_month, tier.limits.tokens_per_month),
            ("requestsPerMinute", snapshot.requests_per_minute, tier.limits.requests_per_minute),
            ("maxConcurrentTasks", snapshot.concurrent_tasks, tier.limits.max_concurrent_tasks),
        ];

        let mut exceeded_limits = Vec::new();
        let mut warnings = Vec::new();
        for (name, current, maximum) in checks {
            if maximum <= 0 {
                continue;
            }
            if current > maximum {
                exceeded_limits.push(ExceededLimit::new(name, current, maximum));
            } else {
                let ratio = current as f64 / maximum as f64;
                if (0.8..1.0).contains(&ratio) {
                    warnings.push(format!("{name} at {:.0}% of limit", ratio * 100.0));
                }
            }
        }

        Ok(LimitsCheck {
            within_limits: exceeded_limits.is_empty(),
            exceeded_limits,
            warnings,
            tier,
            current_usage: snapshot,
        })
    }

    async fn rolling_request_count(&self, user_id: UserId, now: Timestamp) -> UaosResult<i64> {
        let since = now - Duration::seconds(60);
        let entries = self.store.list_cost_entries(Some(since), Some(now)).await?;
        Ok(entries.iter().filter(|e| e.user_id == Some(user_id)).count() as i64)
    }

    // ------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------

    pub async fn get_cost_report(&self, opts: ReportOptions) -> UaosResult<CostReport> {
        let entries = self.store.list_cost_entries(opts.since, opts.until).await?;
        let tier_lookup = |uid: Option<UserId>| uid.and_then(|u| self.user_tier_id(u).ok()).unwrap_or_default();
        Ok(cost_report(&entries, &opts, tier_lookup))
    }

    pub async fn get_usage_report(&self, opts: ReportOptions) -> UaosResult<UsageReport> {
        let entries = self.store.list_cost_entries(opts.since, opts.until).await?;
        let tier_lookup = |uid: Option<UserId>| uid.and_then(|u| self.user_tier_id(u).ok()).unwrap_or_default();
        Ok(usage_report(&entries, &opts, tier_lookup))
    }
}

fn add_to_totals(totals: &mut UsageTotals, entry: &LlmCostEntry) {
    totals.input_tokens += entry.input_tokens;
    totals.output_tokens += entry.output_tokens;
    totals.tokens_used += entry.input_tokens + entry.output_tokens;
    totals.request_count += 1;
    totals.cost_cents += entry.cost_cents;
}

fn substitute_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    static TOKEN: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap());
    TOKEN
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            vars.get(name).cloned().unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn poisoned(_: impl std::fmt::Debug) -> uaos_types::UaosError {
    uaos_types::UaosError::Internal("admin plane lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uaos_store::InMemoryStore;
    use uaos_types::identity::EntityIdType;

    fn plane() -> AdminPlane {
        AdminPlane::new(Arc::new(InMemoryStore::new()), &UaosConfig::default())
    }

    #[test]
    fn config_set_appends_audit_record() {
        let admin = plane();
        admin.set("limits", "max_steps", Value::Int(10), Some("tuning".into()), None).unwrap();
        assert_eq!(admin.get("limits", "max_steps").unwrap(), Some(Value::Int(10)));
        let log = admin.audit_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].reason.as_deref(), Some("tuning"));
    }

    #[test]
    fn prompt_compile_substitutes_known_vars_and_leaves_unknown() {
        let admin = plane();
        admin.create_prompt("greet", "Greeting", "Hello {{name}}, welcome to {{place}}!").unwrap();
        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), "Ada".to_string());
        let compiled = admin.compile("greet", &vars).unwrap();
        assert_eq!(compiled, "Hello Ada, welcome to {{place}}!");
    }

    #[test]
    fn free_tier_cannot_be_deleted() {
        let admin = plane();
        assert!(admin.delete_tier(FREE_TIER_ID).is_err());
    }

    #[test]
    fn set_user_tier_rejects_unknown_tier() {
        let admin = plane();
        let user = UserId::now_v7();
        assert!(admin.set_user_tier(user, "nonexistent").is_err());
        admin.set_user_tier(user, "pro").unwrap();
        assert_eq!(admin.user_tier_id(user).unwrap(), "pro");
    }

    #[tokio::test]
    async fn record_llm_cost_updates_day_and_month_usage() {
        let admin = plane();
        let user = UserId::now_v7();
        for _ in 0..10 {
            admin
                .record_llm_cost(RecordCostArgs {
                    user_id: Some(user),
                    session_id: None,
                    model: "claude-sonnet".into(),
                    operation: "chat".into(),
                    input_tokens: 600,
                    output_tokens: 500,
                    cost_cents: None,
                    latency_ms: 5,
                    success: true,
                    error: None,
                })
                .await
                .unwrap();
        }
        let now = Utc::now();
        let day = admin.get_usage(user, &PeriodKind::Day.key(now)).await.unwrap();
        assert_eq!(day.totals.tokens_used, 11_000);
    }

    #[tokio::test]
    async fn cost_tracking_disabled_records_nothing() {
        let mut cfg = UaosConfig::default();
        cfg.enable_cost_tracking = false;
        let admin = AdminPlane::new(Arc::new(InMemoryStore::new()), &cfg);
        let user = UserId::now_v7();
        let recorded = admin
            .record_llm_cost(RecordCostArgs {
                user_id: Some(user),
                session_id: None,
                model: "claude-sonnet".into(),
                operation: "chat".into(),
                input_tokens: 100,
                output_tokens: 100,
                cost_cents: None,
                latency_ms: 1,
                success: true,
                error: None,
            })
            .await
            .unwrap();
        assert!(recorded.is_none());
        let usage = admin.get_usage(user, &PeriodKind::Day.key(Utc::now())).await.unwrap();
        assert_eq!(usage.totals.request_count, 0);
    }

    /// Scenario 4 (§8): free tier `tokensPerDay=10_000`; 10 entries of
    /// 600 in + 500 out tokens (1100/entry, 11_000 total) exceed it by 10%.
    #[tokio::test]
    async fn scenario_cost_accounting_exceeds_free_tier_daily_tokens() {
        let admin = plane();
        let user = UserId::now_v7();
        for _ in 0..10 {
            admin
                .record_llm_cost(RecordCostArgs {
                    user_id: Some(user),
                    session_id: None,
                    model: "claude-sonnet".into(),
                    operation: "chat".into(),
                    input_tokens: 600,
                    output_tokens: 500,
                    cost_cents: None,
                    latency_ms: 5,
                    success: true,
                    error: None,
                })
                .await
                .unwrap();
        }
        let check = admin.check_limits(user, 0).await.unwrap();
        assert!(!check.within_limits);
        let exceeded = check.exceeded_limits.iter().find(|l| l.limit == "tokensPerDay").unwrap();
        assert_eq!(exceeded.current, 11_000);
        assert_eq!(exceeded.maximum, 10_000);
    }

    /// Boundary: `requestsPerMinute = N` tier, N+1 entries within 60s exceeds it.
    #[tokio::test]
    async fn requests_per_minute_boundary_exceeds_on_n_plus_one() {
        let admin = plane();
        let user = UserId::now_v7();
        admin.set_user_tier(user, "pro").unwrap(); // requestsPerMinute = 60
        let tier = admin.get_tier("pro").unwrap().unwrap();
        for _ in 0..=tier.limits.requests_per_minute {
            admin
                .record_llm_cost(RecordCostArgs {
                    user_id: Some(user),
                    session_id: None,
                    model: "claude-haiku".into(),
                    operation: "chat".into(),
                    input_tokens: 1,
                    output_tokens: 1,
                    cost_cents: None,
                    latency_ms: 1,
                    success: true,
                    error: None,
                })
                .await
                .unwrap();
        }
        let check = admin.check_limits(user, 0).await.unwrap();
        assert!(check.exceeded_limits.iter().any(|l| l.limit == "requestsPerMinute"));
    }

    #[tokio::test]
    async fn prune_old_cost_entries_does_not_touch_usage() {
        let admin = plane();
        let user = UserId::now_v7();
        admin
            .record_llm_cost(RecordCostArgs {
                user_id: Some(user),
                session_id: None,
                model: "claude-haiku".into(),
                operation: "chat".into(),
                input_tokens: 10,
                output_tokens: 10,
                cost_cents: None,
                latency_ms: 1,
                success: true,
                error: None,
            })
            .await
            .unwrap();
        let pruned = admin.prune_old_cost_entries().await.unwrap();
        assert_eq!(pruned, 0); // entry is fresh, retention window (90d) not exceeded
        let usage = admin.get_usage(user, &PeriodKind::Day.key(Utc::now())).await.unwrap();
        assert_eq!(usage.totals.request_count, 1);
    }

    #[test]
    fn is_model_allowed_checks_tier_set() {
        let admin = plane();
        assert!(admin.is_model_allowed("free", "claude-haiku").unwrap());
        assert!(!admin.is_model_allowed("free", "claude-opus-4").unwrap());
    }
}
