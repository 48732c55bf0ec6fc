//! In-memory default implementations for the collaborator traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::error::AuthError;
use super::oauth_provider::{SessionSink, StateStore};
use super::types::{AuthorizationRequestState, Session};

/// Entry count below which `put` never sweeps.
const DEFAULT_SWEEP_FLOOR: usize = 1024;

/// In-memory security-check store.
///
/// Abandoned attempts are swept by `put` once the map doubles past its size after the
/// previous sweep, so the scan cost stays amortized over the inserts that caused it.
#[derive(Clone)]
pub struct InMemoryStateStore {
    entries: Arc<DashMap<String, (AuthorizationRequestState, Instant)>>,
    next_sweep: Arc<AtomicUsize>,
    sweep_floor: usize,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::with_sweep_floor(DEFAULT_SWEEP_FLOOR)
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_floor(sweep_floor: usize) -> Self {
        let sweep_floor = sweep_floor.max(1);
        InMemoryStateStore {
            entries: Arc::new(DashMap::new()),
            next_sweep: Arc::new(AtomicUsize::new(sweep_floor)),
            sweep_floor,
        }
    }

    /// Drop every expired record, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        let live = self.entries.len();
        self.next_sweep
            .store(live.saturating_mul(2).max(self.sweep_floor), Ordering::Relaxed);
        before.saturating_sub(live)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put(&self, key: &str, state: AuthorizationRequestState, ttl: Duration) -> Result<(), AuthError> {
        if self.entries.len() >= self.next_sweep.load(Ordering::Relaxed) {
            let purged = self.purge_expired();
            debug!(purged, live = self.entries.len(), "swept expired login attempts");
        }
        self.entries.insert(key.to_owned(), (state, Instant::now() + ttl));
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<AuthorizationRequestState>, AuthError> {
        // DashMap::remove holds the shard lock across lookup and delete.
        Ok(self
            .entries
            .remove(key)
            .and_then(|(_, (state, expires_at))| (expires_at > Instant::now()).then_some(state)))
    }
}

/// Collects sessions in memory, for tests and demos.
#[derive(Clone, Default)]
pub struct InMemorySessionSink {
    sessions: Arc<Mutex<Vec<Session>>>,
}

impl InMemorySessionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SessionSink for InMemorySessionSink {
    async fn persist(&self, session: Session) -> Result<(), AuthError> {
        self.sessions
            .lock()
            .map_err(|_| AuthError::Internal("session sink lock poisoned".into()))?
            .push(session);
        Ok(())
    }
}
