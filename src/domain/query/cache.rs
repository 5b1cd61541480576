//! In-process query result cache
//!
//! Keyed by the digest of the spec's canonical JSON; bounded size with
//! oldest-entry eviction and a short TTL. A hit skips SQL execution
//! entirely, which matters when the model re-runs the same spec while
//! iterating on a plot.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::compiler::Table;
use super::spec::QuerySpec;
use crate::core::constants::{QUERY_CACHE_MAX_ENTRIES, QUERY_CACHE_TTL_SECS};
use crate::utils::crypto::sha256_hex;

struct CacheEntry {
    table: Table,
    inserted: Instant,
}

pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_entries: usize,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
            ttl,
        }
    }

    fn key(spec: &QuerySpec) -> String {
        // Struct field order makes the serialization canonical
        let canonical = serde_json::to_string(spec).unwrap_or_default();
        sha256_hex(&canonical)
    }

    pub fn get(&self, spec: &QuerySpec) -> Option<Table> {
        let key = Self::key(spec);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(entry.table.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, spec: &QuerySpec, table: Table) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }
        entries.insert(
            Self::key(spec),
            CacheEntry {
                table,
                inserted: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(
            QUERY_CACHE_MAX_ENTRIES,
            Duration::from_secs(QUERY_CACHE_TTL_SECS),
        )
    }
}
