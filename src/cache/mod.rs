//! Response caching subsystem.
//!
//! # Data Flow
//! ```text
//! Cacheable route, GET/HEAD request
//!     → key.rs (method + URL + key headers)
//!     → engine.rs lookup
//!         Fresh        → serve (HIT)
//!         Stale (SWR)  → serve (STALE), one background refresh per key
//!         Stale        → conditional request, 304 renews (REVALIDATED)
//!         Miss         → one leader fetches, followers wait and re-read
//!     → directives.rs (storability, freshness)
//!     → store.rs (LRU bounded by entries and bytes)
//! ```
//!
//! # Design Decisions
//! - Entries are immutable; renewal builds a new entry sharing the body
//! - The per-key fill marker is the only per-key mutual exclusion
//! - Any cache failure degrades to a miss

pub mod directives;
pub mod engine;
pub mod key;
pub mod store;

pub use directives::{is_cacheable_request, CacheControl, NotStored};
pub use engine::{CacheEngine, CacheStats, CacheStatus, Fill, FillGuard, Lookup, StoreOutcome};
pub use key::CacheKey;
pub use store::CacheEntry;

/// Response header reporting how the cache handled a request.
pub const X_CACHE_STATUS: &str = "x-cache-status";
