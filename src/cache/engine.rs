//! Shared response cache.
//!
//! # Responsibilities
//! - Classify lookups as fresh, stale (servable or not) or missing
//! - Decide storability and freshness of upstream responses
//! - Renew entries from `304 Not Modified` without copying bodies
//! - Coordinate concurrent fills of the same key (one leader per key)
//! - Purge by URL or URL prefix and report statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::{header, HeaderMap};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;

use crate::cache::directives::{
    check_storable, freshness_lifetime, initial_age, stale_window, CacheControl, NotStored,
};
use crate::cache::key::CacheKey;
use crate::cache::store::{CacheEntry, CacheStore};
use crate::clock::SharedClock;
use crate::config::{CacheConfig, RouteCacheConfig};
use crate::observability::metrics;
use crate::proxy::{ProxyRequest, ProxyResponse};

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    Fresh(Arc<CacheEntry>),
    /// Past its freshness lifetime. When `serve_while_revalidating` is false
    /// the entry must be revalidated before it can be used.
    Stale {
        entry: Arc<CacheEntry>,
        serve_while_revalidating: bool,
    },
    Miss,
}

#[derive(Debug, Clone)]
pub enum StoreOutcome {
    Stored(Arc<CacheEntry>),
    NotStored(NotStored),
}

impl StoreOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, StoreOutcome::Stored(_))
    }
}

/// Value of the `x-cache-status` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
    Revalidated,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
            CacheStatus::Revalidated => "REVALIDATED",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    revalidated: AtomicU64,
    bypass: AtomicU64,
    stored: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub revalidated: u64,
    pub bypass: u64,
    pub stored: u64,
    pub evictions: u64,
    /// Share of lookups answered without a full upstream fetch.
    pub hit_ratio: f64,
}

/// Outcome of claiming the fill marker for a key.
pub enum Fill {
    /// This caller fetches; the marker is held until the guard drops.
    Leader(FillGuard),
    /// Another caller is fetching.
    Follower(FillWaiter),
}

/// Holds a key's in-flight marker. Dropping it wakes all waiters.
#[derive(Debug)]
pub struct FillGuard {
    key: CacheKey,
    inflight: Arc<DashMap<CacheKey, watch::Receiver<()>>>,
    _done: watch::Sender<()>,
}

impl Drop for FillGuard {
    fn drop(&mut self) {
        self.inflight.remove(&self.key);
    }
}

#[derive(Debug)]
pub struct FillWaiter {
    done: watch::Receiver<()>,
}

impl FillWaiter {
    /// Wait for the leader to finish. False if `limit` elapsed first.
    pub async fn wait(mut self, limit: Duration) -> bool {
        // The leader never sends; `changed` resolves when its sender drops.
        tokio::time::timeout(limit, self.done.changed()).await.is_ok()
    }
}

pub struct CacheEngine {
    store: CacheStore,
    config: ArcSwap<CacheConfig>,
    clock: SharedClock,
    inflight: Arc<DashMap<CacheKey, watch::Receiver<()>>>,
    counters: Counters,
}

impl CacheEngine {
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            store: CacheStore::new(config.max_entries, config.max_bytes),
            config: ArcSwap::from_pointee(config),
            clock,
            inflight: Arc::new(DashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn update_config(&self, config: CacheConfig) {
        let evicted = self.store.set_limits(config.max_entries, config.max_bytes);
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        self.config.store(Arc::new(config));
    }

    pub fn is_enabled(&self) -> bool {
        self.config.load().enabled
    }

    /// How long a follower waits for the leader of its key.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.config.load().lock_timeout_ms)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        let Some(entry) = self.store.get(key) else {
            return Lookup::Miss;
        };
        let now = self.clock.now_millis();
        if entry.is_fresh(now) {
            Lookup::Fresh(entry)
        } else if entry.within_stale_window(now) {
            Lookup::Stale {
                entry,
                serve_while_revalidating: true,
            }
        } else if entry.has_validators() {
            Lookup::Stale {
                entry,
                serve_while_revalidating: false,
            }
        } else {
            self.store.remove(key);
            tracing::debug!(key = %key, "Expired cache entry dropped");
            Lookup::Miss
        }
    }

    /// Store `response` as the answer to `request` if the caching rules allow.
    pub fn store(
        &self,
        key: &CacheKey,
        request: &ProxyRequest,
        response: &ProxyResponse,
        policy: &RouteCacheConfig,
    ) -> StoreOutcome {
        let config = self.config.load();
        let cc = CacheControl::parse(&response.headers);
        if let Err(reason) = check_storable(request, response, &cc, policy, &config) {
            tracing::debug!(key = %key, reason = reason.as_str(), "Response not stored");
            return StoreOutcome::NotStored(reason);
        }

        let entry = self.build_entry(
            key,
            response.status,
            response.headers.clone(),
            response.body.clone(),
            policy,
            &config,
        );
        if entry.lifetime.is_zero() && !entry.has_validators() {
            tracing::debug!(key = %key, reason = "no-freshness", "Response not stored");
            return StoreOutcome::NotStored(NotStored::NoFreshness);
        }

        let entry = Arc::new(entry);
        self.insert(entry.clone());
        tracing::debug!(
            key = %key,
            lifetime_secs = entry.lifetime.as_secs(),
            bytes = entry.size(),
            "Response stored"
        );
        StoreOutcome::Stored(entry)
    }

    /// Build the renewed entry after a `304 Not Modified`: headers of the 304
    /// replace the stored ones, the body bytes are shared.
    pub fn renew(
        &self,
        stale: &CacheEntry,
        not_modified: &ProxyResponse,
        policy: &RouteCacheConfig,
    ) -> Arc<CacheEntry> {
        let mut headers = stale.headers.clone();
        for name in not_modified.headers.keys() {
            if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
                continue;
            }
            headers.remove(name);
            for value in not_modified.headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        let config = self.config.load();
        let entry = Arc::new(self.build_entry(
            &stale.key,
            stale.status,
            headers,
            stale.body.clone(),
            policy,
            &config,
        ));
        self.insert(entry.clone());
        tracing::debug!(key = %stale.key, lifetime_secs = entry.lifetime.as_secs(), "Cache entry revalidated");
        entry
    }

    /// `request` made conditional on the entry's validators.
    pub fn conditional_request(entry: &CacheEntry, request: &ProxyRequest) -> ProxyRequest {
        let mut conditional = request.clone();
        if let Some(etag) = &entry.etag {
            conditional.headers.insert(header::IF_NONE_MATCH, etag.clone());
        }
        if let Some(modified) = &entry.last_modified {
            conditional
                .headers
                .insert(header::IF_MODIFIED_SINCE, modified.clone());
        }
        conditional
    }

    fn build_entry(
        &self,
        key: &CacheKey,
        status: axum::http::StatusCode,
        mut headers: HeaderMap,
        body: axum::body::Bytes,
        policy: &RouteCacheConfig,
        config: &CacheConfig,
    ) -> CacheEntry {
        let cc = CacheControl::parse(&headers);
        let lifetime = freshness_lifetime(&headers, &cc, policy, config, self.clock.unix_secs());
        let initial_age = initial_age(&headers);
        headers.remove(header::AGE);
        CacheEntry {
            key: key.clone(),
            status,
            etag: headers.get(header::ETAG).cloned(),
            last_modified: headers.get(header::LAST_MODIFIED).cloned(),
            headers,
            body,
            stored_at_ms: self.clock.now_millis(),
            initial_age,
            lifetime,
            stale_while_revalidate: stale_window(&cc, policy),
            must_revalidate: cc.must_revalidate,
        }
    }

    fn insert(&self, entry: Arc<CacheEntry>) {
        let evicted = self.store.insert(entry);
        self.counters.stored.fetch_add(1, Ordering::Relaxed);
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        metrics::set_cache_size(self.store.len(), self.store.bytes());
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.store.remove(key)
    }

    /// Claim the in-flight marker for `key`, or join whoever holds it.
    pub fn begin_fill(&self, key: &CacheKey) -> Fill {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(existing) => Fill::Follower(FillWaiter {
                done: existing.get().clone(),
            }),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(());
                slot.insert(rx);
                Fill::Leader(FillGuard {
                    key: key.clone(),
                    inflight: self.inflight.clone(),
                    _done: tx,
                })
            }
        }
    }

    /// Claim the marker for a background refresh; `None` if a fill or
    /// refresh of the key is already running.
    pub fn try_begin_refresh(&self, key: &CacheKey) -> Option<FillGuard> {
        match self.begin_fill(key) {
            Fill::Leader(guard) => Some(guard),
            Fill::Follower(_) => None,
        }
    }

    pub fn is_filling(&self, key: &CacheKey) -> bool {
        self.inflight.contains_key(key)
    }

    /// Remove all entries for an absolute URL (any method or key header).
    pub fn purge_url(&self, url: &str) -> usize {
        let removed = self.store.remove_where(|k| k.url() == url);
        self.after_purge(url, removed)
    }

    pub fn purge_prefix(&self, prefix: &str) -> usize {
        let removed = self.store.remove_where(|k| k.url().starts_with(prefix));
        self.after_purge(prefix, removed)
    }

    fn after_purge(&self, target: &str, removed: usize) -> usize {
        tracing::info!(purged = %target, removed, "Cache purged");
        metrics::set_cache_size(self.store.len(), self.store.bytes());
        removed
    }

    /// Count a client-facing lookup result.
    pub fn record(&self, status: CacheStatus) {
        let counter = match status {
            CacheStatus::Hit => &self.counters.hits,
            CacheStatus::Miss => &self.counters.misses,
            CacheStatus::Stale => &self.counters.stale,
            CacheStatus::Revalidated => &self.counters.revalidated,
            CacheStatus::Bypass => &self.counters.bypass,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(status.as_str());
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let stale = c.stale.load(Ordering::Relaxed);
        let revalidated = c.revalidated.load(Ordering::Relaxed);
        let served = hits + stale + revalidated;
        let lookups = served + misses;
        CacheStats {
            enabled: self.is_enabled(),
            entries: self.store.len(),
            bytes: self.store.bytes(),
            hits,
            misses,
            stale,
            revalidated,
            bypass: c.bypass.load(Ordering::Relaxed),
            stored: c.stored.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                served as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use axum::http::StatusCode;

    fn engine() -> (CacheEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (CacheEngine::new(CacheConfig::default(), clock.clone()), clock)
    }

    fn request(path: &str) -> ProxyRequest {
        ProxyRequest::get(path).with_header("host", "shop.test")
    }

    fn key(req: &ProxyRequest) -> CacheKey {
        CacheKey::from_request(req, &RouteCacheConfig::default().key_headers)
    }

    fn ok(cache_control: &str) -> ProxyResponse {
        ProxyResponse::new(StatusCode::OK)
            .with_header("cache-control", cache_control)
            .with_body("payload")
    }

    #[test]
    fn max_age_goes_fresh_then_stale_then_miss() {
        let (cache, clock) = engine();
        let req = request("/items");
        let k = key(&req);
        let policy = RouteCacheConfig::default();

        assert!(matches!(cache.lookup(&k), Lookup::Miss));
        assert!(cache.store(&k, &req, &ok("max-age=60"), &policy).is_stored());

        clock.advance(Duration::from_secs(59));
        assert!(matches!(cache.lookup(&k), Lookup::Fresh(_)));

        clock.advance(Duration::from_secs(2));
        // No stale window and no validators: dropped on lookup.
        assert!(matches!(cache.lookup(&k), Lookup::Miss));
        assert!(cache.is_empty());
    }

    #[test]
    fn absurd_upstream_age_is_already_stale() {
        let (cache, clock) = engine();
        let req = request("/aged");
        let k = key(&req);
        let resp = ok("max-age=60")
            .with_header("age", "18446744073709551615")
            .with_header("etag", "\"old\"");
        cache.store(&k, &req, &resp, &RouteCacheConfig::default());

        clock.advance(Duration::from_millis(1_500));
        match cache.lookup(&k) {
            Lookup::Stale { entry, serve_while_revalidating } => {
                assert!(!serve_while_revalidating);
                let served = entry.to_response(clock.now_millis());
                assert!(served.header_str("age").is_some());
            }
            Lookup::Miss => {}
            Lookup::Fresh(_) => panic!("entry with a huge Age must not be fresh"),
        }
        // Later lookups keep working.
        assert!(!matches!(cache.lookup(&k), Lookup::Fresh(_)));
    }

    #[test]
    fn stale_while_revalidate_window() {
        let (cache, clock) = engine();
        let req = request("/feed");
        let k = key(&req);
        let policy = RouteCacheConfig::default();
        cache.store(&k, &req, &ok("max-age=10, stale-while-revalidate=30"), &policy);

        clock.advance(Duration::from_secs(20));
        assert!(matches!(
            cache.lookup(&k),
            Lookup::Stale { serve_while_revalidating: true, .. }
        ));

        clock.advance(Duration::from_secs(30));
        assert!(matches!(cache.lookup(&k), Lookup::Miss));
    }

    #[test]
    fn must_revalidate_with_validators_is_not_served_stale() {
        let (cache, clock) = engine();
        let req = request("/doc");
        let k = key(&req);
        let resp = ok("max-age=1, must-revalidate, stale-while-revalidate=60")
            .with_header("etag", "\"v1\"");
        cache.store(&k, &req, &resp, &RouteCacheConfig::default());

        clock.advance(Duration::from_secs(5));
        match cache.lookup(&k) {
            Lookup::Stale { entry, serve_while_revalidating } => {
                assert!(!serve_while_revalidating);
                let conditional = CacheEngine::conditional_request(&entry, &req);
                assert_eq!(conditional.header_str("if-none-match"), Some("\"v1\""));
            }
            other => panic!("expected stale, got {:?}", other),
        }
    }

    #[test]
    fn no_store_is_never_present() {
        let (cache, _) = engine();
        let req = request("/secret");
        let k = key(&req);
        let outcome = cache.store(&k, &req, &ok("no-store"), &RouteCacheConfig::default());
        assert!(matches!(outcome, StoreOutcome::NotStored(NotStored::NoStore)));
        assert!(matches!(cache.lookup(&k), Lookup::Miss));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn no_cache_with_validator_is_stored_for_revalidation() {
        let (cache, _) = engine();
        let req = request("/always-check");
        let k = key(&req);
        let resp = ok("no-cache").with_header("etag", "\"a\"");
        assert!(cache.store(&k, &req, &resp, &RouteCacheConfig::default()).is_stored());
        assert!(matches!(
            cache.lookup(&k),
            Lookup::Stale { serve_while_revalidating: false, .. }
        ));

        let bare = request("/bare");
        let outcome = cache.store(&key(&bare), &bare, &ok("no-cache"), &RouteCacheConfig::default());
        assert!(matches!(outcome, StoreOutcome::NotStored(NotStored::NoFreshness)));
    }

    #[test]
    fn renew_shares_body_and_merges_headers() {
        let (cache, clock) = engine();
        let req = request("/logo.png");
        let k = key(&req);
        let policy = RouteCacheConfig::default();
        let resp = ok("max-age=10")
            .with_header("etag", "\"v1\"")
            .with_header("x-version", "1");
        let StoreOutcome::Stored(original) = cache.store(&k, &req, &resp, &policy) else {
            panic!("expected stored");
        };

        clock.advance(Duration::from_secs(30));
        let not_modified = ProxyResponse::new(StatusCode::NOT_MODIFIED)
            .with_header("cache-control", "max-age=120")
            .with_header("x-version", "2");
        let renewed = cache.renew(&original, &not_modified, &policy);

        assert_eq!(renewed.body.as_ptr(), original.body.as_ptr());
        assert_eq!(renewed.status, StatusCode::OK);
        assert_eq!(renewed.lifetime, Duration::from_secs(120));
        assert_eq!(renewed.headers.get("x-version").unwrap(), "2");
        assert_eq!(renewed.etag.as_ref().unwrap(), "\"v1\"");
        assert!(matches!(cache.lookup(&k), Lookup::Fresh(_)));
    }

    #[test]
    fn upstream_age_reduces_freshness() {
        let (cache, clock) = engine();
        let req = request("/aged");
        let k = key(&req);
        let resp = ok("max-age=60").with_header("age", "50");
        cache.store(&k, &req, &resp, &RouteCacheConfig::default());

        clock.advance(Duration::from_secs(11));
        assert!(matches!(cache.lookup(&k), Lookup::Miss));
    }

    #[test]
    fn purge_by_url_and_prefix() {
        let (cache, _) = engine();
        let policy = RouteCacheConfig::default();
        for path in ["/api/a", "/api/b", "/static/x"] {
            let req = request(path);
            cache.store(&key(&req), &req, &ok("max-age=60"), &policy);
        }
        assert_eq!(cache.purge_url("http://shop.test/api/a"), 1);
        assert_eq!(cache.purge_prefix("http://shop.test/api/"), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn one_leader_per_key() {
        let (cache, _) = engine();
        let k = key(&request("/hot"));

        let Fill::Leader(guard) = cache.begin_fill(&k) else {
            panic!("first caller leads");
        };
        let Fill::Follower(waiter) = cache.begin_fill(&k) else {
            panic!("second caller follows");
        };
        assert!(cache.try_begin_refresh(&k).is_none());

        let wait = tokio::spawn(waiter.wait(Duration::from_secs(5)));
        drop(guard);
        assert!(wait.await.unwrap());
        assert!(!cache.is_filling(&k));
        assert!(matches!(cache.begin_fill(&k), Fill::Leader(_)));
    }

    #[test]
    fn stats_hit_ratio() {
        let (cache, _) = engine();
        cache.record(CacheStatus::Hit);
        cache.record(CacheStatus::Hit);
        cache.record(CacheStatus::Stale);
        cache.record(CacheStatus::Miss);
        cache.record(CacheStatus::Bypass);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.bypass, 1);
        assert!((stats.hit_ratio - 0.75).abs() < f64::EPSILON);
    }
}
