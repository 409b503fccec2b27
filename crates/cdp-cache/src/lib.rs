//! Process-wide, in-memory caches shared across a single planner run.
//!
//! Provides [`AccountAliasCache`] (account id → display name, indefinite
//! retention within a run) and [`InstanceTypeCache`] (a 24h TTL cache of
//! each provider/service's valid resource-type catalogue). Neither persists
//! to disk — the planner keeps no state between invocations (PRD §1) — but
//! both are read-mostly, lock-guarded singletons within one run, following
//! the snapshot-under-lock idiom the rest of this codebase uses for shared
//! state.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

// ─── Account alias cache ───────────────────────────────────────────────────────

/// Maps account id → display name. Populated lazily as the source resolves
/// accounts; entries are never evicted within a run.
#[derive(Default)]
pub struct AccountAliasCache {
    entries: RwLock<HashMap<String, String>>,
}

impl AccountAliasCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account: &str) -> Option<String> {
        self.entries.read().get(account).cloned()
    }

    pub fn insert(&self, account: impl Into<String>, display_name: impl Into<String>) {
        self.entries.write().insert(account.into(), display_name.into());
    }

    /// Look up the alias, falling back to `fallback` (and caching it) on miss.
    pub fn get_or_insert_with(&self, account: &str, fallback: impl FnOnce() -> String) -> String {
        if let Some(existing) = self.get(account) {
            return existing;
        }
        let value = fallback();
        self.insert(account.to_string(), value.clone());
        value
    }

    /// Test hook: clear all entries (PRD §9).
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Instance-type cache ───────────────────────────────────────────────────────

const INSTANCE_TYPE_TTL_SECS: i64 = 24 * 60 * 60;

struct InstanceTypeEntry {
    types: Vec<String>,
    fetched_at: DateTime<Utc>,
}

/// 24-hour TTL cache of a provider/service's valid resource-type catalogue,
/// keyed by `"{provider}:{service}"` (PRD §4.6).
#[derive(Default)]
pub struct InstanceTypeCache {
    entries: RwLock<HashMap<String, InstanceTypeEntry>>,
}

impl InstanceTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(provider: &str, service: &str) -> String {
        format!("{provider}:{service}")
    }

    /// Returns the cached catalogue if present and not yet expired.
    pub fn get(&self, provider: &str, service: &str, now: DateTime<Utc>) -> Option<Vec<String>> {
        let key = Self::key(provider, service);
        let guard = self.entries.read();
        let entry = guard.get(&key)?;
        let age = now.signed_duration_since(entry.fetched_at);
        if age.num_seconds() > INSTANCE_TYPE_TTL_SECS {
            debug!(provider, service, "instance-type cache entry expired");
            return None;
        }
        Some(entry.types.clone())
    }

    pub fn insert(&self, provider: &str, service: &str, types: Vec<String>, now: DateTime<Utc>) {
        let key = Self::key(provider, service);
        self.entries.write().insert(
            key,
            InstanceTypeEntry {
                types,
                fetched_at: now,
            },
        );
    }

    /// Test hook: clear all entries (PRD §9).
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
