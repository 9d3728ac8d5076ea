//! The single background cleanup sweeper (spec.md §9: "a single background
//! sweeper; no per-session timer"). Owns no state of its own beyond the
//! `JoinHandle` needed to stop it.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uaos_admin::AdminPlane;
use uaos_persona::PersonaPlane;
use uaos_session::SessionManager;

/// Spawns the one loop that drives every time-based cleanup in the service:
/// expired-session eviction, stale LLM cost-entry pruning, and expired
/// (`complete`, past the retention window) persona harvest pruning. All
/// three ride the same `interval_ms` tick rather than each owning a timer,
/// matching spec.md §9's "single background sweeper" note. Returns the
/// handle; aborting it stops every sweep at once.
pub fn spawn(sessions: Arc<SessionManager>, admin: Arc<AdminPlane>, persona: Arc<PersonaPlane>, interval_ms: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            tick.tick().await;
            match sessions.cleanup() {
                Ok(0) => {}
                Ok(n) => debug!(evicted = n, "cleanup sweep removed expired sessions"),
                Err(err) => warn!(%err, "session cleanup sweep failed"),
            }
            match admin.prune_old_cost_entries().await {
                Ok(0) => {}
                Ok(n) => debug!(pruned = n, "cleanup sweep pruned stale cost entries"),
                Err(err) => warn!(%err, "cost entry prune sweep failed"),
            }
            match persona.prune_expired_harvests(None).await {
                Ok(0) => {}
                Ok(n) => debug!(pruned = n, "cleanup sweep pruned expired persona harvests"),
                Err(err) => warn!(%err, "persona harvest prune sweep failed"),
            }
        }
    })
}
