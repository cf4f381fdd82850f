//! In-memory store of authorizations waiting for the SSO callback.
//!
//! Each record is keyed by a correlation token that travels in the
//! `oidc_session` cookie. Records are consumed at most once: [`PendingStore::resolve`]
//! removes before returning, and expired records are never handed out even if
//! the reaper has not swept them yet.

mod clock;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub use clock::{Clock, ManualClock, SystemClock};

use crate::config::defaults;
use crate::error::{BridgeError, BridgeResult};

/// One in-flight SSO round trip.
#[derive(Debug)]
pub struct PendingAuthorization<R> {
    pub correlation_id: String,
    pub nonce: u64,
    /// The engine's authorization request, returned untouched on resolve.
    pub request: R,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<R> PendingAuthorization<R> {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

struct Inner<R> {
    records: HashMap<String, PendingAuthorization<R>>,
    expiry: BinaryHeap<Reverse<(DateTime<Utc>, String)>>,
}

impl<R> Inner<R> {
    /// Drop every record whose expiry has passed. Returns how many were removed.
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while let Some(Reverse((expires_at, _))) = self.expiry.peek() {
            if *expires_at > now {
                break;
            }
            let Some(Reverse((_, id))) = self.expiry.pop() else {
                break;
            };
            // Resolved records are already gone; removing them again is a no-op.
            if self.records.get(&id).is_some_and(|r| r.is_expired(now)) {
                self.records.remove(&id);
                removed += 1;
            }
        }
        removed
    }

    /// Remove a record and drop stale heap entries once they outnumber live ones.
    fn take(&mut self, id: &str) -> Option<PendingAuthorization<R>> {
        let record = self.records.remove(id)?;
        if self.expiry.len() > 2 * self.records.len() {
            let records = &self.records;
            self.expiry.retain(|Reverse((_, key))| records.contains_key(key));
        }
        Some(record)
    }
}

/// Store of pending authorizations, shared by the begin and callback handlers.
pub struct PendingStore<R> {
    inner: Mutex<Inner<R>>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    max_pending: usize,
}

impl<R> PendingStore<R> {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, max_pending: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { records: HashMap::new(), expiry: BinaryHeap::new() }),
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            max_pending,
        }
    }

    /// Store with the default lifetime and cap, on the wall clock.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(SystemClock), defaults::PENDING_TTL, defaults::MAX_PENDING)
    }

    /// Generate a random token from two UUIDs.
    fn generate_correlation_id() -> String {
        format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
    }

    /// Register a pending authorization.
    ///
    /// Returns the correlation token for the cookie and the nonce to embed in
    /// the signed handshake.
    pub async fn begin(&self, request: R) -> BridgeResult<(String, u64)> {
        let now = self.clock.now();
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let nonce = OsRng.next_u64();

        let mut inner = self.inner.lock().await;
        if inner.records.len() >= self.max_pending && inner.sweep(now) == 0 {
            tracing::warn!(pending = inner.records.len(), "Pending authorization limit reached");
            return Err(BridgeError::TooManyPending);
        }

        let mut correlation_id = Self::generate_correlation_id();
        while inner.records.contains_key(&correlation_id) {
            correlation_id = Self::generate_correlation_id();
        }

        inner.expiry.push(Reverse((expires_at, correlation_id.clone())));
        inner.records.insert(
            correlation_id.clone(),
            PendingAuthorization {
                correlation_id: correlation_id.clone(),
                nonce,
                request,
                created_at: now,
                expires_at,
            },
        );

        tracing::debug!(correlation_id = %correlation_id, %expires_at, "Registered pending authorization");
        Ok((correlation_id, nonce))
    }

    /// Take the pending authorization for `correlation_id` (one-time use).
    ///
    /// Unknown, already resolved, and expired tokens all yield
    /// [`BridgeError::SessionNotFound`].
    pub async fn resolve(&self, correlation_id: &str) -> BridgeResult<PendingAuthorization<R>> {
        let now = self.clock.now();
        let record = self.inner.lock().await.take(correlation_id);

        match record {
            Some(pending) if !pending.is_expired(now) => Ok(pending),
            Some(_) => {
                tracing::debug!(correlation_id = %correlation_id, "Pending authorization expired");
                Err(BridgeError::SessionNotFound)
            }
            None => Err(BridgeError::SessionNotFound),
        }
    }

    /// Remove expired records. Returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let removed = self.inner.lock().await.sweep(now);
        if removed > 0 {
            tracing::debug!(count = removed, "Cleaned up expired pending authorizations");
        }
        removed
    }

    /// Number of records currently held, including expired ones not yet swept.
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.records.len()
    }
}

impl<R: Send + 'static> PendingStore<R> {
    /// Start the background task that sweeps expired records.
    pub fn start_reaper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

impl<R> std::fmt::Debug for PendingStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingStore")
            .field("ttl", &self.ttl)
            .field("max_pending", &self.max_pending)
            .finish()
    }
}
