//! Cache module for storing API responses
//!
//! Responses are keyed by endpoint and canonical query parameters and expire
//! after an endpoint-specific TTL. `CacheManager` persists entries to disk so
//! they survive restarts; `MemoryCache` and `NoCache` implement the same
//! `CacheStore` contract for tests and for running with caching disabled.

mod key;
mod manager;
mod policy;
mod store;

pub use key::{CacheKey, Params};
pub use manager::CacheManager;
pub use policy::{ttl_for, TtlCategory};
pub use store::{
    system_clock, CacheEntry, CacheError, CacheStats, CacheStore, Clock, MemoryCache, NoCache,
};

