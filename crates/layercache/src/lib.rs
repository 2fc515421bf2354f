//! Two-tier caching with alias indexing.
//!
//! ## Architecture
//!
//! - **L1 (local)**: in-process LRU with per-map TTL, never fails, never suspends
//! - **L2 (remote)**: shared key-value store (Redis), every step a round trip
//! - **Executor**: bounded retry and single-flight coalescing around L2 calls
//! - **Backfill worker**: promotes L2 hits into L1 off the request path
//!
//! ## Lookup Hierarchy
//!
//! ```text
//! get_or_set → L1 (LRU) → L2 (Redis) → loader
//!                  ↑          │           │
//!                  └─backfill─┘           └─ write-through → L1, L2
//! ```
//!
//! ## Aliases
//!
//! A record is stored once under its canonical key `hash(prefix, [name, id])`.
//! The request key and the record id are aliases that resolve to the canonical
//! key, so a record loaded by `"u1"` can be read or invalidated later through
//! its id. Deleting through any alias removes the value and every alias.

pub mod backfill;
pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod keys;
pub mod metrics;
pub mod outcome;
pub mod registry;
pub mod store;
pub mod tier;

pub use backfill::BackfillStats;
pub use cache::{Cache, CacheBuilder, CacheStats, CacheValue};
pub use config::{
    BackfillConfig, CacheSettings, LocalConfig, RedisConfig, RetryConfig, load_settings,
};
pub use error::{CacheError, CacheResult};
pub use executor::{Executor, RetryPolicy, SingleFlight};
pub use keys::{gen_key, key_part};
pub use outcome::Outcome;
pub use registry::StoreRegistry;
pub use store::{BoundedMap, MemoryStore, RedisStore, RemoteStore, StoreError};
pub use tier::{LocalTier, RemoteTier, Tier, TierKind};
