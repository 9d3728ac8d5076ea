//! Cost and usage report aggregation (C7): `getCostReport`/`getUsageReport`
//! over a date range with an optional `groupBy`.

use chrono::Datelike;
use std::collections::BTreeMap;
use uaos_types::{GroupBy, LlmCostEntry, Timestamp, UserId};

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub group_by: Option<GroupBy>,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default)]
pub struct ReportBucket {
    pub key: String,
    pub total_cost_cents: f64,
    pub total_tokens: i64,
    pub request_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CostReport {
    pub buckets: Vec<ReportBucket>,
    pub total_cost_cents: f64,
    pub total_requests: i64,
}

#[derive(Debug, Clone, Default)]
pub struct UsageReport {
    pub buckets: Vec<ReportBucket>,
    pub total_tokens: i64,
    pub total_requests: i64,
}

/// `week` period key: ISO week, `YYYY-Www`.
fn week_key(ts: Timestamp) -> String {
    let iso = ts.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

fn bucket_key(entry: &LlmCostEntry, group_by: GroupBy, tier_of: &dyn Fn(Option<UserId>) -> String) -> String {
    match group_by {
        GroupBy::Day => entry.timestamp.format("%Y-%m-%d").to_string(),
        GroupBy::Week => week_key(entry.timestamp),
        GroupBy::Month => entry.timestamp.format("%Y-%m").to_string(),
        GroupBy::User => entry.user_id.map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string()),
        GroupBy::Tier => tier_of(entry.user_id),
        GroupBy::Model => entry.model.clone(),
        GroupBy::Operation => entry.operation.clone(),
    }
}

fn filter<'a>(entries: &'a [LlmCostEntry], opts: &ReportOptions) -> Vec<&'a LlmCostEntry> {
    entries
        .iter()
        .filter(|e| opts.since.map_or(true, |s| e.timestamp >= s))
        .filter(|e| opts.until.map_or(true, |u| e.timestamp <= u))
        .filter(|e| opts.user_id.map_or(true, |u| e.user_id == Some(u)))
        .collect()
}

pub fn cost_report(entries: &[LlmCostEntry], opts: &ReportOptions, tier_of: impl Fn(Option<UserId>) -> String) -> CostReport {
    let matched = filter(entries, opts);
    let total_cost_cents = matched.iter().map(|e| e.cost_cents).sum();
    let total_requests = matched.len() as i64;

    let buckets = match opts.group_by {
        None => Vec::new(),
        Some(group_by) => {
            let mut by_key: BTreeMap<String, ReportBucket> = BTreeMap::new();
            for entry in &matched {
                let key = bucket_key(entry, group_by, &tier_of);
                let bucket = by_key.entry(key.clone()).or_insert_with(|| ReportBucket { key, ..Default::default() });
                bucket.total_cost_cents += entry.cost_cents;
                bucket.total_tokens += entry.input_tokens + entry.output_tokens;
                bucket.request_count += 1;
            }
            by_key.into_values().collect()
        }
    };

    CostReport { buckets, total_cost_cents, total_requests }
}

pub fn usage_report(entries: &[LlmCostEntry], opts: &ReportOptions, tier_of: impl Fn(Option<UserId>) -> String) -> UsageReport {
    let matched = filter(entries, opts);
    let total_tokens = matched.iter().map(|e| e.input_tokens + e.output_tokens).sum();
    let total_requests = matched.len() as i64;

    let buckets = match opts.group_by {
        None => Vec::new(),
        Some(group_by) => {
            let mut by_key: BTreeMap<String, ReportBucket> = BTreeMap::new();
            for entry in &matched {
                let key = bucket_key(entry, group_by, &tier_of);
                let bucket = by_key.entry(key.clone()).or_insert_with(|| ReportBucket { key, ..Default::default() });
                bucket.total_tokens += entry.input_tokens + entry.output_tokens;
                bucket.total_cost_cents += entry.cost_cents;
                bucket.request_count += 1;
            }
            by_key.into_values().collect()
        }
    };

    UsageReport { buckets, total_tokens, total_requests }
}
