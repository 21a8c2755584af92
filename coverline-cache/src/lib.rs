//! Coverline Cache - Multi-Level Request Cache
//!
//! A process-local memory tier in front of a shared remote tier. Each tier has
//! its own TTL, the memory TTL never exceeding the remote one. Reads fall
//! through memory to remote and backfill memory on a remote hit. Writes go to
//! both tiers.
//!
//! # Degradation
//!
//! The remote tier is never allowed to fail a request. Every remote call is
//! bounded by a timeout and any failure is logged and counted in
//! [`CacheStats::remote_errors`]; the cache then behaves as memory-only for
//! that call.
//!
//! # Example
//!
//! ```ignore
//! let cache = MultiLevelCache::new(CacheConfig::default(), remote, clock);
//! let key = CacheKey::builder("cover_letter").identity(user_id).segment(id).build();
//!
//! cache.set(&key, &letter, TierTtl::new(Duration::from_secs(60), Duration::from_secs(600))).await?;
//! let hit: Option<CoverLetter> = cache.get(&key).await;
//! ```

pub mod config;
pub mod key;
pub mod lmdb;
pub mod memory;
pub mod multi_level;
pub mod read;
pub mod remote;
pub mod traits;

pub use config::{CacheConfig, TierTtl};
pub use key::{CacheKey, CacheKeyBuilder};
pub use lmdb::{LmdbCacheError, LmdbRemoteTier};
pub use memory::MemoryTier;
pub use multi_level::MultiLevelCache;
pub use read::{CacheRead, CacheSource};
pub use remote::{InMemoryRemoteTier, NullRemoteTier};
pub use traits::{CacheStats, RemoteEntry, RemoteTier, ResourceFetcher};
