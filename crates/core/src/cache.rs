// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory TTL cache of remote entity values.
//!
//! Expired entries read as misses and are dropped on access; a periodic
//! [`ReadThroughCache::sweep_expired`] reclaims the rest. Writes coming from
//! sync or conflict resolution overwrite unconditionally, since they always
//! carry the remote's latest known state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{add_duration, ClockSource};
use crate::conflict::apply_local;
use crate::op::{EntityKey, PendingOperation, Version};

/// A remote value as last seen by this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub key: EntityKey,
    pub value: Value,
    pub remote_version: Version,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What a read through the engine sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CacheRead {
    /// Remote value with no local mutations outstanding.
    Fresh { record: CachedRecord },
    /// Optimistic value: the cached base (if any) with pending mutations
    /// applied in queue order.
    Pending {
        value: Value,
        base: Option<CachedRecord>,
        operations: usize,
    },
    Miss,
}

impl CacheRead {
    /// The value a caller should display, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            CacheRead::Fresh { record } => Some(&record.value),
            CacheRead::Pending { value, .. } => Some(value),
            CacheRead::Miss => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CacheRead::Pending { .. })
    }
}

/// TTL cache keyed by entity.
///
/// Besides the live entries it remembers the last remote state seen for each
/// entity. Expiry only affects reads; a client that stays offline past the
/// TTL can still compute writes against the version it last saw.
pub struct ReadThroughCache {
    entries: Mutex<Entries>,
    default_ttl: Duration,
    clock: Arc<dyn ClockSource>,
}

#[derive(Default)]
struct Entries {
    live: HashMap<EntityKey, CachedRecord>,
    last_known: HashMap<EntityKey, CachedRecord>,
}

impl ReadThroughCache {
    pub fn new(default_ttl: Duration, clock: Arc<dyn ClockSource>) -> Self {
        ReadThroughCache { entries: Mutex::new(Entries::default()), default_ttl, clock }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the live entry for `key`, dropping it if expired.
    pub fn get(&self, key: &EntityKey) -> Option<CachedRecord> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.live.get(key) {
            Some(record) if record.is_expired(now) => {
                entries.live.remove(key);
                None
            }
            Some(record) => Some(record.clone()),
            None => None,
        }
    }

    /// The last remote state stored for `key`, expired or not.
    pub fn last_known(&self, key: &EntityKey) -> Option<CachedRecord> {
        self.lock().last_known.get(key).cloned()
    }

    /// Stores a remote value, replacing any existing entry.
    pub fn put(
        &self,
        key: EntityKey,
        value: Value,
        version: Version,
        ttl: Option<Duration>,
    ) -> CachedRecord {
        let fetched_at = self.clock.now();
        let record = CachedRecord {
            key: key.clone(),
            value,
            remote_version: version,
            fetched_at,
            expires_at: add_duration(fetched_at, ttl.unwrap_or(self.default_ttl)),
        };
        let mut entries = self.lock();
        entries.last_known.insert(key.clone(), record.clone());
        entries.live.insert(key, record.clone());
        record
    }

    /// Forgets an entity entirely. Returns true if a live entry was present.
    pub fn invalidate(&self, key: &EntityKey) -> bool {
        let mut entries = self.lock();
        entries.last_known.remove(key);
        entries.live.remove(key).is_some()
    }

    /// Removes all expired entries, returning how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.live.len();
        entries.live.retain(|_, record| !record.is_expired(now));
        before - entries.live.len()
    }

    /// Number of live entries, expired or not.
    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Combines a cached value with pending mutations into an engine read.
pub fn overlay(base: Option<CachedRecord>, pending: &[PendingOperation]) -> CacheRead {
    if pending.is_empty() {
        return match base {
            Some(record) => CacheRead::Fresh { record },
            None => CacheRead::Miss,
        };
    }

    let start = base.as_ref().map_or(Value::Null, |r| r.value.clone());
    let value = pending.iter().fold(start, |value, op| apply_local(op.kind, &op.payload, &value));
    CacheRead::Pending { value, base, operations: pending.len() }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
