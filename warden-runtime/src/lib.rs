//! # Warden Runtime
//!
//! Async layer of the warden trust engine.
//!
//! Provides:
//! - `TrustEngine`, the shared entry point for interactions, violations and predictions
//! - Per-profile serialization of score updates
//! - Storage calls on the blocking pool under a timeout, with last-known fallback
//! - Supervised background tasks for refresh, prediction, tuning and maintenance
//! - JSON audit snapshots

pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
pub mod snapshot;
pub mod supervisor;

pub use config::{EngineConfig, RuntimeConfig, ScheduleConfig};
pub use engine::{AnalyticsReport, EngineStats, PatternCleanup, TrustEngine, TrustUpdate};
pub use error::{EngineError, Result};
pub use locks::KeyedLocks;
pub use snapshot::{PatternRecord, Snapshot, SnapshotSummary};
pub use supervisor::{TaskStatus, TaskSupervisor};
