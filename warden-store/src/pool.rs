//! Bounded SQLite connection pool
//!
//! Handles are created up front, tuned once when they are opened, and probed
//! for liveness on every checkout. A probe failure discards the handle and r2d2
//! replaces it. When every handle is checked out, `acquire` fails with
//! `PoolExhausted` instead of queueing.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// A connection checked out of the pool. Dropping it releases it.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on open handles
    pub max_connections: u32,
    /// Longest wait for a handle that is being replaced
    pub acquire_timeout_ms: u64,
    /// SQLite busy timeout set on every handle
    pub busy_timeout_ms: u64,
    /// Page cache per handle in KiB
    pub cache_size_kib: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout_ms: 250,
            busy_timeout_ms: 5_000,
            cache_size_kib: 20_000,
        }
    }
}

impl PoolConfig {
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Statements run exactly once on each newly opened handle
    fn init_sql(&self) -> String {
        format!(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; \
             PRAGMA cache_size=-{}; PRAGMA temp_store=MEMORY; PRAGMA foreign_keys=ON;",
            self.cache_size_kib
        )
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub max_connections: u32,
    pub connections: u32,
    pub idle: u32,
    pub in_use: u32,
}

/// Bounded pool of tuned SQLite handles
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<SqliteConnectionManager>,
    config: PoolConfig,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl ConnectionPool {
    /// Open a pool on a database file, creating it if missing
    pub fn open(path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), max = config.max_connections, "Opening connection pool");
        Self::build(SqliteConnectionManager::file(path), config)
    }

    /// Open a pool on a private in-memory database.
    ///
    /// Every handle in the pool shares the same database through SQLite's
    /// shared cache; each call gets a uniquely named database.
    pub fn in_memory(config: PoolConfig) -> Result<Self> {
        let name = uuid::Uuid::new_v4().simple().to_string();
        let manager =
            SqliteConnectionManager::file(format!("file:warden-{name}?mode=memory&cache=shared"));
        Self::build(manager, config)
    }

    fn build(manager: SqliteConnectionManager, config: PoolConfig) -> Result<Self> {
        let init_sql = config.init_sql();
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = manager.with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch(&init_sql)
        });

        let max = config.max_connections.max(1);
        let pool = Pool::builder()
            .max_size(max)
            .min_idle(Some(max))
            .test_on_check_out(true)
            .connection_timeout(config.acquire_timeout().max(Duration::from_millis(1)))
            .build(manager)?;

        Ok(Self { pool, config })
    }

    /// Check out a live connection.
    ///
    /// Fails with `PoolExhausted` when `max_connections` handles are already
    /// in use. Never waits longer than the acquire timeout.
    pub fn acquire(&self) -> Result<PooledConnection> {
        if let Some(conn) = self.pool.try_get() {
            return Ok(conn);
        }

        let state = self.state();
        if state.idle == 0 && state.connections >= state.max_connections {
            debug!(max = state.max_connections, "Pool exhausted");
            return Err(StoreError::PoolExhausted {
                max: state.max_connections,
            });
        }

        // A handle is being replaced or has just been released; wait briefly.
        match self.pool.get_timeout(self.config.acquire_timeout()) {
            Ok(conn) => Ok(conn),
            Err(err) => {
                let state = self.state();
                if state.connections >= state.max_connections {
                    Err(StoreError::PoolExhausted {
                        max: state.max_connections,
                    })
                } else {
                    Err(err.into())
                }
            }
        }
    }

    /// Return a connection to the idle set
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    pub fn state(&self) -> PoolState {
        let state = self.pool.state();
        PoolState {
            max_connections: self.pool.max_size(),
            connections: state.connections,
            idle: state.idle_connections,
            in_use: state.connections.saturating_sub(state.idle_connections),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn test_handles_are_tuned() {
        let pool = ConnectionPool::in_memory(PoolConfig::default().with_max_connections(2)).unwrap();
        let conn = pool.acquire().unwrap();

        let cache_size: i64 = conn.query_row("PRAGMA cache_size", [], |r| r.get(0)).unwrap();
        let temp_store: i64 = conn.query_row("PRAGMA temp_store", [], |r| r.get(0)).unwrap();
        assert_eq!(cache_size, -20_000);
        assert_eq!(temp_store, 2);
    }

    #[test]
    fn test_file_pool_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(dir.path().join("pool.db"), PoolConfig::default()).unwrap();
        let conn = pool.acquire().unwrap();

        let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_exhaustion_fails_fast() {
        let max = 3;
        let pool = ConnectionPool::in_memory(PoolConfig::default().with_max_connections(max)).unwrap();
        let barrier = Barrier::new(max as usize + 1);

        let results: Vec<Result<()>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..=max)
                .map(|_| {
                    s.spawn(|| {
                        let conn = pool.acquire();
                        // Hold every successful checkout until all callers have tried.
                        barrier.wait();
                        conn.map(|_| ())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let exhausted = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::PoolExhausted { max: 3 })))
            .count();
        assert_eq!(exhausted, 1);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), max as usize);
    }

    #[test]
    fn test_release_makes_handle_available() {
        let pool = ConnectionPool::in_memory(PoolConfig::default().with_max_connections(1)).unwrap();

        let conn = pool.acquire().unwrap();
        assert!(matches!(pool.acquire(), Err(StoreError::PoolExhausted { .. })));
        assert_eq!(pool.state().in_use, 1);

        pool.release(conn);
        assert!(pool.acquire().is_ok());
    }
}
