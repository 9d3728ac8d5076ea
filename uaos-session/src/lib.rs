//! Session lifecycle: create/get/list/expire, capacity eviction, touch
//! semantics (C3).
//!
//! Uses an in-memory mock pattern (`RwLock<HashMap<..>>` behind a struct
//! with a coarse lock for map-shape changes) generalized with an
//! oldest-updated-first eviction and touch-extends-expiry policy. Time is
//! threaded through as an explicit `Timestamp` parameter on the pure logic
//! functions so tests can drive exact timelines without depending on wall
//! clock timing; the public `SessionManager` methods supply `Utc::now()`.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::instrument;
use uaos_types::{Session, SessionError, SessionId, Timestamp, UaosConfig, UaosResult, UserId};

/// Thread-safe session store with capacity eviction and TTL-based expiry.
///
/// The session map uses one coarse `RwLock` for create/evict/cleanup and
/// per-call read/write locking for individual lookups, matching the "coarse
/// lock for create/evict, per-entry locks for updates" posture
/// (there is no separate per-session lock type here since `Session` itself is
/// plain data guarded by the map lock; serialization of buffer/task mutation
/// within one session is the owning component's job, not this one's).
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Session>>,
    max_sessions: usize,
    session_ttl: Duration,
}

impl SessionManager {
    pub fn new(config: &UaosConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: config.max_sessions,
            session_ttl: Duration::milliseconds(config.session_timeout_ms as i64),
        }
    }

    /// `create({userId?, name?}) -> Session`. Evicts the oldest-updated
    /// session first if already at capacity.
    #[instrument(skip(self))]
    pub fn create(&self, user_id: Option<UserId>, name: Option<String>) -> UaosResult<Session> {
        let now = Utc::now();
        let mut guard = self.sessions.write().map_err(poisoned)?;
        evict_if_at_capacity(&mut guard, self.max_sessions);
        let session = Session::new(SessionId::now_v7(), user_id, name, now, self.session_ttl);
        guard.insert(session.id, session.clone());
        Ok(session)
    }

    /// `get(id) -> Session?`. Returns `None` if expired; expired sessions
    /// are removed on access.
    #[instrument(skip(self))]
    pub fn get(&self, id: SessionId) -> UaosResult<Option<Session>> {
        let now = Utc::now();
        let mut guard = self.sessions.write().map_err(poisoned)?;
        match guard.get(&id) {
            Some(s) if s.is_expired(now) => {
                guard.remove(&id);
                Ok(None)
            }
            Some(s) => Ok(Some(s.clone())),
            None => Ok(None),
        }
    }

    /// `s.updatedAt = now; s.expiresAt = now + sessionTTL`, persisted back
    /// into the map. Returns the touched session, or `NotFound` if it no
    /// longer exists (expired or never created).
    #[instrument(skip(self))]
    pub fn touch(&self, id: SessionId) -> UaosResult<Session> {
        let now = Utc::now();
        let mut guard = self.sessions.write().map_err(poisoned)?;
        let session = guard
            .get_mut(&id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        touch_session(session, now, self.session_ttl);
        Ok(session.clone())
    }

    /// Apply an in-place mutation to a session (used by callers that need to
    /// update buffers/history/counters atomically with a touch), then touch
    /// it and persist.
    #[instrument(skip(self, f))]
    pub fn update<F, T>(&self, id: SessionId, f: F) -> UaosResult<T>
    where
        F: FnOnce(&mut Session) -> T,
    {
        let now = Utc::now();
        let mut guard = self.sessions.write().map_err(poisoned)?;
        let session = guard
            .get_mut(&id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let result = f(session);
        touch_session(session, now, self.session_ttl);
        Ok(result)
    }

    /// `list() -> [Session]`: non-expired sessions, newest-updated first.
    #[instrument(skip(self))]
    pub fn list(&self) -> UaosResult<Vec<Session>> {
        let now = Utc::now();
        let guard = self.sessions.read().map_err(poisoned)?;
        let mut out: Vec<Session> = guard.values().filter(|s| !s.is_expired(now)).cloned().collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    /// Deletes all expired sessions; returns how many were removed.
    #[instrument(skip(self))]
    pub fn cleanup(&self) -> UaosResult<usize> {
        let now = Utc::now();
        let mut guard = self.sessions.write().map_err(poisoned)?;
        let before = guard.len();
        guard.retain(|_, s| !s.is_expired(now));
        Ok(before - guard.len())
    }

    pub fn delete(&self, id: SessionId) -> UaosResult<()> {
        let mut guard = self.sessions.write().map_err(poisoned)?;
        guard.remove(&id);
        Ok(())
    }

    /// Stop accepting further mutation conceptually and clear the map. The
    /// background cleanup sweep (driven externally, see `uaos-service`'s
    /// bootstrap) should be cancelled by the caller before or after calling
    /// this; `SessionManager` itself holds no timer handle.
    pub fn destroy(&self) -> UaosResult<()> {
        let mut guard = self.sessions.write().map_err(poisoned)?;
        guard.clear();
        Ok(())
    }

    pub fn len(&self) -> UaosResult<usize> {
        Ok(self.sessions.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> UaosResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn poisoned(_: impl std::fmt::Debug) -> uaos_types::UaosError {
    uaos_types::UaosError::Internal("session map lock poisoned".to_string())
}

fn touch_session(session: &mut Session, now: Timestamp, ttl: Duration) {
    session.updated_at = now;
    session.expires_at = now + ttl;
}

/// If the map is already at `max_sessions`, remove the session with the
/// oldest `updated_at`. O(N) scan over a capped session count.
fn evict_if_at_capacity(map: &mut HashMap<SessionId, Session>, max_sessions: usize) {
    if map.len() < max_sessions {
        return;
    }
    if let Some(oldest_id) = map
        .values()
        .min_by_key(|s| s.updated_at)
        .map(|s| s.id)
    {
        map.remove(&oldest_id);
    }
}
