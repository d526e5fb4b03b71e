//! # Warden Store
//!
//! Pooled SQLite persistence for warden trust state.
//!
//! - **ConnectionPool**: bounded set of tuned handles that fails fast when exhausted
//! - **QueryCache**: TTL + LRU cache of read results, invalidated per profile on write
//! - **TrustStore**: typed CRUD for profiles, violations, predictions, patterns and
//!   quarantine events, batched transactional writes, and periodic maintenance
//!
//! All operations are synchronous. Async callers should run them on a blocking pool.

pub mod cache;
pub mod error;
pub mod pool;
pub mod schema;
pub mod store;

pub use cache::{cache_key, CacheConfig, CacheStats, QueryCache};
pub use error::{Result, StoreError};
pub use pool::{ConnectionPool, PoolConfig, PoolState, PooledConnection};
pub use store::{MaintenanceReport, StoreConfig, TrustStore, WriteOp};
