//! Snapshot cache - Keep recently parsed uploads for previews
//!
//! Each upload gets a session id. The parsed snapshot is kept for a fixed
//! window so the preview export can run without re-parsing. Entries are
//! checked for age on read; a stale entry is a miss and is evicted.
//!
//! The cache never feeds a sync: sync always parses the file it is given.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::clock::Clock;
use crate::snapshot::ParsedSnapshot;

/// Default validity window.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// A cached upload.
#[derive(Debug)]
pub struct CachedSnapshot {
    pub file_name: String,
    pub snapshot: ParsedSnapshot,
    pub created_at: DateTime<Utc>,
}

/// Why a lookup found nothing usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMiss {
    NotFound,
    Expired,
}

/// Session-keyed, time-boxed snapshot holder.
pub struct SnapshotCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, Arc<CachedSnapshot>>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache a snapshot under a fresh session id.
    pub fn insert(&self, file_name: impl Into<String>, snapshot: ParsedSnapshot) -> String {
        let session = Uuid::new_v4().to_string();
        self.put(&session, file_name, snapshot);
        session
    }

    /// Write the slot for `session`, replacing whatever was there.
    pub fn put(&self, session: &str, file_name: impl Into<String>, snapshot: ParsedSnapshot) {
        let entry = CachedSnapshot {
            file_name: file_name.into(),
            snapshot,
            created_at: self.clock.now(),
        };
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(session.to_string(), Arc::new(entry));
    }

    /// Fetch a live entry. Expired entries are evicted.
    pub fn get(&self, session: &str) -> Result<Arc<CachedSnapshot>, CacheMiss> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(session) {
                None => return Err(CacheMiss::NotFound),
                Some(entry) if now - entry.created_at <= self.ttl => return Ok(Arc::clone(entry)),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(session);
        Err(CacheMiss::Expired)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| now - entry.created_at <= self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
