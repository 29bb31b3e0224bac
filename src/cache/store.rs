//! Entry storage with LRU eviction.
//!
//! Entries are immutable and shared; a revalidated entry replaces the old
//! one wholesale while reusing its body bytes. Eviction removes the least
//! recently used entries until both the entry and byte bounds hold.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use dashmap::DashMap;

use crate::cache::key::CacheKey;
use crate::proxy::ProxyResponse;

/// A stored response.
#[derive(Debug)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub stored_at_ms: u64,
    /// Age the response already had when it was stored.
    pub initial_age: Duration,
    pub lifetime: Duration,
    pub stale_while_revalidate: Duration,
    pub must_revalidate: bool,
    pub etag: Option<HeaderValue>,
    pub last_modified: Option<HeaderValue>,
}

impl CacheEntry {
    pub fn age(&self, now_ms: u64) -> Duration {
        self.initial_age
            .saturating_add(Duration::from_millis(now_ms.saturating_sub(self.stored_at_ms)))
    }

    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.age(now_ms) < self.lifetime
    }

    /// Stale, but inside the window where it may be served while a
    /// background refresh runs.
    pub fn within_stale_window(&self, now_ms: u64) -> bool {
        !self.must_revalidate
            && self.age(now_ms).saturating_sub(self.lifetime) < self.stale_while_revalidate
    }

    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Response for a client, with the current `Age`.
    pub fn to_response(&self, now_ms: u64) -> ProxyResponse {
        let mut headers = self.headers.clone();
        headers.insert(header::AGE, HeaderValue::from(self.age(now_ms).as_secs()));
        ProxyResponse {
            status: self.status,
            headers,
            body: self.body.clone(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    entry: Arc<CacheEntry>,
    last_used: AtomicU64,
}

/// Bounded map of entries.
#[derive(Debug)]
pub struct CacheStore {
    entries: DashMap<CacheKey, Slot>,
    bytes: AtomicUsize,
    tick: AtomicU64,
    max_entries: AtomicUsize,
    max_bytes: AtomicUsize,
}

impl CacheStore {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            bytes: AtomicUsize::new(0),
            tick: AtomicU64::new(0),
            max_entries: AtomicUsize::new(max_entries),
            max_bytes: AtomicUsize::new(max_bytes),
        }
    }

    /// Change the bounds; evicts immediately if they shrank.
    pub fn set_limits(&self, max_entries: usize, max_bytes: usize) -> usize {
        self.max_entries.store(max_entries, Ordering::Relaxed);
        self.max_bytes.store(max_bytes, Ordering::Relaxed);
        self.evict()
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let slot = self.entries.get(key)?;
        slot.last_used.store(self.next_tick(), Ordering::Relaxed);
        Some(slot.entry.clone())
    }

    /// Insert or replace. Returns how many entries were evicted.
    pub fn insert(&self, entry: Arc<CacheEntry>) -> usize {
        let size = entry.size();
        let slot = Slot {
            entry: entry.clone(),
            last_used: AtomicU64::new(self.next_tick()),
        };
        self.bytes.fetch_add(size, Ordering::Relaxed);
        if let Some(old) = self.entries.insert(entry.key.clone(), slot) {
            self.bytes.fetch_sub(old.entry.size(), Ordering::Relaxed);
        }
        self.evict()
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some((_, slot)) => {
                self.bytes.fetch_sub(slot.entry.size(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose key matches. Returns the number removed.
    pub fn remove_where(&self, matches: impl Fn(&CacheKey) -> bool) -> usize {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| matches(e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.iter().filter(|k| self.remove(k)).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    fn over_limit(&self) -> bool {
        self.entries.len() > self.max_entries.load(Ordering::Relaxed)
            || self.bytes() > self.max_bytes.load(Ordering::Relaxed)
    }

    fn evict(&self) -> usize {
        let mut evicted = 0;
        while self.over_limit() {
            let victim = self
                .entries
                .iter()
                .min_by_key(|e| e.value().last_used.load(Ordering::Relaxed))
                .map(|e| e.key().clone());
            match victim {
                Some(key) => {
                    if self.remove(&key) {
                        tracing::debug!(key = %key, "Cache entry evicted");
                        evicted += 1;
                    }
                }
                None => break,
            }
        }
        evicted
    }
}
