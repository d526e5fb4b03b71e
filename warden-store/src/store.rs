//! Storage engine
//!
//! Typed CRUD for profiles, violations, predictions, behavioral patterns and
//! quarantine events on top of the connection pool and query cache. Reads try
//! the cache first. Writes invalidate every cached entry scoped to the profile
//! they touch.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_core::{
    BehavioralPattern, ProfileKey, QuarantineEvent, RiskLevel, SampleSeries, TrustPrediction,
    TrustProfile, Violation, ViolationType,
};

use crate::cache::{CacheConfig, CacheStats, QueryCache};
use crate::error::{Result, StoreError};
use crate::pool::{ConnectionPool, PoolConfig, PoolState};
use crate::schema;

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file
    pub path: PathBuf,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    /// Violations and quarantine events older than this are purged
    pub retention_days: i64,
    /// Interval of the maintenance task
    pub maintenance_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warden.db"),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            retention_days: 90,
            maintenance_interval_secs: 24 * 60 * 60,
        }
    }
}

impl StoreConfig {
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn retention(&self) -> Duration {
        Duration::days(self.retention_days)
    }

    pub fn maintenance_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// One write inside a batch
#[derive(Debug, Clone)]
pub enum WriteOp {
    UpsertProfile(Box<TrustProfile>),
    LogViolation(ProfileKey, Violation),
    StorePrediction(Box<TrustPrediction>),
    RetirePrediction(ProfileKey),
    SavePattern(ProfileKey, Box<BehavioralPattern>),
    RecordQuarantine(QuarantineEvent),
    /// Engine-wide value in `warden_meta`
    SetMeta(String, String),
}

impl WriteOp {
    fn key(&self) -> Option<&ProfileKey> {
        match self {
            WriteOp::UpsertProfile(profile) => Some(&profile.key),
            WriteOp::LogViolation(key, _) => Some(key),
            WriteOp::StorePrediction(prediction) => Some(&prediction.key),
            WriteOp::RetirePrediction(key) => Some(key),
            WriteOp::SavePattern(key, _) => Some(key),
            WriteOp::RecordQuarantine(event) => Some(&event.key),
            WriteOp::SetMeta(..) => None,
        }
    }

    fn apply(&self, conn: &Connection, floor: DateTime<Utc>) -> Result<()> {
        match self {
            WriteOp::UpsertProfile(profile) => put_profile(conn, profile, floor),
            WriteOp::LogViolation(key, violation) => put_violation(conn, key, violation),
            WriteOp::StorePrediction(prediction) => put_prediction(conn, prediction),
            WriteOp::RetirePrediction(key) => delete_prediction(conn, key).map(|_| ()),
            WriteOp::SavePattern(key, pattern) => put_pattern(conn, key, pattern),
            WriteOp::RecordQuarantine(event) => put_quarantine(conn, event),
            WriteOp::SetMeta(key, value) => put_meta(conn, key, value),
        }
    }
}

/// Outcome of a maintenance pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub cutoff: DateTime<Utc>,
    pub violations_purged: usize,
    pub quarantines_purged: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
enum Cached {
    Profile(Box<TrustProfile>),
    Violations(Vec<Violation>),
    Prediction(Option<Box<TrustPrediction>>),
    Pattern(Box<BehavioralPattern>),
}

const Q_PROFILE: &str = "profile";
const Q_VIOLATIONS_SINCE: &str = "violations_since";
const Q_PREDICTION: &str = "prediction";
const Q_PATTERN: &str = "pattern";

const PROFILE_COLUMNS: &str = "user_id, guild_id, trust_score, risk_level, confidence, \
     positive_interactions, improvement_streak, created_at, last_updated";
const VIOLATION_COLUMNS: &str = "user_id, guild_id, id, violation_type, severity, evidence, timestamp";

/// Pooled, cached trust storage
#[derive(Debug)]
pub struct TrustStore {
    pool: ConnectionPool,
    cache: QueryCache<Cached>,
    config: StoreConfig,
}

impl TrustStore {
    /// Open the database at `config.path`, creating the schema if needed
    pub fn open(config: StoreConfig) -> Result<Self> {
        let pool = ConnectionPool::open(&config.path, config.pool.clone())?;
        Self::with_pool(pool, config)
    }

    /// Open a store on a fresh in-memory database
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        let pool = ConnectionPool::in_memory(config.pool.clone())?;
        Self::with_pool(pool, config)
    }

    fn with_pool(pool: ConnectionPool, config: StoreConfig) -> Result<Self> {
        {
            let conn = pool.acquire()?;
            schema::initialize(&conn)?;
        }
        info!(
            max_connections = config.pool.max_connections,
            cache_capacity = config.cache.capacity,
            "Trust store ready"
        );
        Ok(Self {
            pool,
            cache: QueryCache::new(config.cache.clone()),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn pool_state(&self) -> PoolState {
        self.pool.state()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Violations older than this are past retention and never re-inserted
    fn violation_floor(&self) -> DateTime<Utc> {
        Utc::now() - self.config.retention()
    }

    fn invalidate(&self, key: &ProfileKey) {
        self.cache.invalidate_scope(&key.to_string());
    }

    // Profiles

    /// Profile with its full violation history
    pub fn get_profile(&self, key: &ProfileKey) -> Result<Option<TrustProfile>> {
        let params = [key.user_id.as_str(), key.guild_id.as_str()];
        if let Some(Cached::Profile(profile)) = self.cache.get(Q_PROFILE, &params) {
            debug!(user = %key, "Profile cache hit");
            return Ok(Some(*profile));
        }

        let conn = self.pool.acquire()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = ?1 AND guild_id = ?2"
                ),
                params,
                read_profile_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM violations \
             WHERE user_id = ?1 AND guild_id = ?2 ORDER BY timestamp ASC"
        ))?;
        let violations = stmt
            .query_map(params, read_violation_row)?
            .map(|r| r.map_err(StoreError::from).and_then(|(_, v)| v.into_violation()))
            .collect::<Result<Vec<_>>>()?;

        let profile = row.into_profile(violations)?;
        self.cache.set(
            Q_PROFILE,
            &params,
            &key.to_string(),
            Cached::Profile(Box::new(profile.clone())),
        );
        Ok(Some(profile))
    }

    /// Insert or replace a profile. New violations in its history are appended.
    pub fn upsert_profile(&self, profile: &TrustProfile) -> Result<()> {
        let floor = self.violation_floor();
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;
        put_profile(&tx, profile, floor)?;
        tx.commit()?;
        self.invalidate(&profile.key);
        Ok(())
    }

    /// Every stored profile with its violations
    pub fn list_profiles(&self) -> Result<Vec<TrustProfile>> {
        let conn = self.pool.acquire()?;

        let mut by_key: BTreeMap<ProfileKey, Vec<Violation>> = BTreeMap::new();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM violations ORDER BY timestamp ASC"
        ))?;
        for row in stmt.query_map([], read_violation_row)? {
            let (key, violation) = row?;
            by_key.entry(key).or_default().push(violation.into_violation()?);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM user_profiles ORDER BY guild_id, user_id"
        ))?;
        let rows = stmt
            .query_map([], read_profile_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|row| {
                let violations = by_key.remove(&row.key).unwrap_or_default();
                row.into_profile(violations)
            })
            .collect()
    }

    pub fn profile_count(&self) -> Result<u64> {
        let conn = self.pool.acquire()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM user_profiles", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    // Violations

    pub fn log_violation(&self, key: &ProfileKey, violation: &Violation) -> Result<()> {
        let conn = self.pool.acquire()?;
        put_violation(&conn, key, violation)?;
        self.invalidate(key);
        Ok(())
    }

    /// Violations at or after `since`, oldest first
    pub fn get_violations(&self, key: &ProfileKey, since: DateTime<Utc>) -> Result<Vec<Violation>> {
        let since_param = since.to_rfc3339();
        let params = [key.user_id.as_str(), key.guild_id.as_str(), since_param.as_str()];
        if let Some(Cached::Violations(violations)) = self.cache.get(Q_VIOLATIONS_SINCE, &params) {
            return Ok(violations);
        }

        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM violations \
             WHERE user_id = ?1 AND guild_id = ?2 AND timestamp >= ?3 ORDER BY timestamp ASC"
        ))?;
        let violations = stmt
            .query_map(params![key.user_id, key.guild_id, since], read_violation_row)?
            .map(|r| r.map_err(StoreError::from).and_then(|(_, v)| v.into_violation()))
            .collect::<Result<Vec<_>>>()?;

        self.cache.set(
            Q_VIOLATIONS_SINCE,
            &params,
            &key.to_string(),
            Cached::Violations(violations.clone()),
        );
        Ok(violations)
    }

    // Predictions

    /// Store a prediction, superseding any previous one for the same profile
    pub fn store_prediction(&self, prediction: &TrustPrediction) -> Result<()> {
        let conn = self.pool.acquire()?;
        put_prediction(&conn, prediction)?;
        self.invalidate(&prediction.key);
        Ok(())
    }

    pub fn get_prediction(&self, key: &ProfileKey) -> Result<Option<TrustPrediction>> {
        let params = [key.user_id.as_str(), key.guild_id.as_str()];
        if let Some(Cached::Prediction(prediction)) = self.cache.get(Q_PREDICTION, &params) {
            return Ok(prediction.map(|p| *p));
        }

        let conn = self.pool.acquire()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM trust_predictions WHERE user_id = ?1 AND guild_id = ?2",
                params,
                |r| r.get(0),
            )
            .optional()?;
        let prediction = body
            .map(|b| serde_json::from_str::<TrustPrediction>(&b))
            .transpose()?;

        self.cache.set(
            Q_PREDICTION,
            &params,
            &key.to_string(),
            Cached::Prediction(prediction.clone().map(Box::new)),
        );
        Ok(prediction)
    }

    /// Predictions whose horizon has elapsed at `now`
    pub fn due_predictions(&self, now: DateTime<Utc>) -> Result<Vec<TrustPrediction>> {
        self.query_predictions(
            "SELECT body FROM trust_predictions WHERE due_at <= ?1 ORDER BY due_at ASC",
            params![now],
        )
    }

    /// Every outstanding prediction
    pub fn list_predictions(&self) -> Result<Vec<TrustPrediction>> {
        self.query_predictions(
            "SELECT body FROM trust_predictions ORDER BY guild_id, user_id",
            params![],
        )
    }

    fn query_predictions(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<TrustPrediction>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(sql)?;
        let bodies = stmt
            .query_map(params, |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(StoreError::from))
            .collect()
    }

    /// Remove an evaluated prediction. Returns whether one existed.
    pub fn retire_prediction(&self, key: &ProfileKey) -> Result<bool> {
        let conn = self.pool.acquire()?;
        let removed = delete_prediction(&conn, key)?;
        self.invalidate(key);
        Ok(removed > 0)
    }

    // Behavioral patterns

    pub fn save_pattern(&self, key: &ProfileKey, pattern: &BehavioralPattern) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;
        put_pattern(&tx, key, pattern)?;
        tx.commit()?;
        self.invalidate(key);
        Ok(())
    }

    pub fn load_pattern(&self, key: &ProfileKey) -> Result<Option<BehavioralPattern>> {
        let params = [key.user_id.as_str(), key.guild_id.as_str()];
        if let Some(Cached::Pattern(pattern)) = self.cache.get(Q_PATTERN, &params) {
            return Ok(Some(*pattern));
        }

        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT signal, samples FROM behavioral_patterns WHERE user_id = ?1 AND guild_id = ?2",
        )?;
        let rows = stmt
            .query_map(params, |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut pattern = BehavioralPattern::new();
        for (signal, samples) in rows {
            *pattern.series_mut(&signal) = serde_json::from_str::<SampleSeries>(&samples)?;
        }

        self.cache.set(
            Q_PATTERN,
            &params,
            &key.to_string(),
            Cached::Pattern(Box::new(pattern.clone())),
        );
        Ok(Some(pattern))
    }

    /// Every profile with a stored pattern
    pub fn pattern_keys(&self) -> Result<Vec<ProfileKey>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT user_id, guild_id FROM behavioral_patterns ORDER BY user_id, guild_id",
        )?;
        let keys = stmt
            .query_map([], |r| Ok(ProfileKey::new(r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    pub fn delete_pattern(&self, key: &ProfileKey) -> Result<bool> {
        let conn = self.pool.acquire()?;
        let removed = conn.execute(
            "DELETE FROM behavioral_patterns WHERE user_id = ?1 AND guild_id = ?2",
            params![key.user_id, key.guild_id],
        )?;
        drop(conn);
        self.invalidate(key);
        Ok(removed > 0)
    }

    pub fn list_patterns(&self) -> Result<Vec<(ProfileKey, BehavioralPattern)>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare("SELECT user_id, guild_id, signal, samples FROM behavioral_patterns")?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    ProfileKey::new(r.get::<_, String>(0)?, r.get::<_, String>(1)?),
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut patterns: BTreeMap<ProfileKey, BehavioralPattern> = BTreeMap::new();
        for (key, signal, samples) in rows {
            let series: SampleSeries = serde_json::from_str(&samples)?;
            *patterns.entry(key).or_default().series_mut(&signal) = series;
        }
        Ok(patterns.into_iter().collect())
    }

    // Quarantine history

    pub fn record_quarantine(&self, event: &QuarantineEvent) -> Result<()> {
        let conn = self.pool.acquire()?;
        put_quarantine(&conn, event)
    }

    /// Quarantines issued for one profile, oldest first
    pub fn quarantines_for(&self, key: &ProfileKey) -> Result<Vec<QuarantineEvent>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT duration_secs, reason, issued_at FROM quarantine_events \
             WHERE user_id = ?1 AND guild_id = ?2 ORDER BY issued_at ASC",
        )?;
        let events = stmt
            .query_map(params![key.user_id, key.guild_id], |r| {
                Ok(QuarantineEvent {
                    key: key.clone(),
                    duration_secs: r.get(0)?,
                    reason: r.get(1)?,
                    issued_at: r.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn quarantine_count(&self) -> Result<u64> {
        let conn = self.pool.acquire()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM quarantine_events", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    // Metadata

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.acquire()?;
        Ok(conn
            .query_row("SELECT value FROM warden_meta WHERE key = ?1", [key], |r| r.get(0))
            .optional()?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.acquire()?;
        put_meta(&conn, key, value)
    }

    // Batches and maintenance

    /// Apply every op in one transaction. Any failure rolls back the whole batch.
    pub fn write_batch(&self, ops: &[WriteOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let floor = self.violation_floor();
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;
        for op in ops {
            op.apply(&tx, floor)?;
        }
        tx.commit()?;

        for key in ops.iter().filter_map(WriteOp::key) {
            self.invalidate(key);
        }
        debug!(ops = ops.len(), "Batch committed");
        Ok(())
    }

    /// Purge rows past retention, refresh planner statistics and reclaim space
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let started = Instant::now();
        let cutoff = now - self.config.retention();

        let conn = self.pool.acquire()?;
        let violations_purged =
            conn.execute("DELETE FROM violations WHERE timestamp < ?1", params![cutoff])?;
        let quarantines_purged =
            conn.execute("DELETE FROM quarantine_events WHERE issued_at < ?1", params![cutoff])?;
        conn.execute_batch("ANALYZE; VACUUM;")?;
        drop(conn);

        self.cache.clear();

        let report = MaintenanceReport {
            cutoff,
            violations_purged,
            quarantines_purged,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            violations = violations_purged,
            quarantines = quarantines_purged,
            elapsed_ms = report.elapsed_ms,
            "Storage maintenance complete"
        );
        Ok(report)
    }
}

// Row mapping

struct ProfileRow {
    key: ProfileKey,
    trust_score: f64,
    risk_level: String,
    confidence: f64,
    positive_interactions: i64,
    improvement_streak: i64,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

fn read_profile_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        key: ProfileKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        trust_score: row.get(2)?,
        risk_level: row.get(3)?,
        confidence: row.get(4)?,
        positive_interactions: row.get(5)?,
        improvement_streak: row.get(6)?,
        created_at: row.get(7)?,
        last_updated: row.get(8)?,
    })
}

impl ProfileRow {
    fn into_profile(self, violation_history: Vec<Violation>) -> Result<TrustProfile> {
        let risk_level: RiskLevel = self.risk_level.parse().map_err(|_| {
            StoreError::CorruptRow(format!("{}: unknown risk level {:?}", self.key, self.risk_level))
        })?;

        let mut profile = TrustProfile {
            key: self.key,
            trust_score: self.trust_score,
            risk_level,
            confidence: self.confidence,
            positive_interactions: self.positive_interactions.max(0) as u64,
            improvement_streak: self.improvement_streak.clamp(0, u32::MAX as i64) as u32,
            violation_history,
            created_at: self.created_at,
            last_updated: self.last_updated,
        };
        if let Some(problem) = profile.sanitize() {
            warn!(user = %profile.key, error = %problem, "Clamped invalid profile on load");
        }
        Ok(profile)
    }
}

struct ViolationRow {
    id: String,
    violation_type: String,
    severity: f64,
    evidence: Option<String>,
    timestamp: DateTime<Utc>,
}

fn read_violation_row(row: &Row<'_>) -> rusqlite::Result<(ProfileKey, ViolationRow)> {
    Ok((
        ProfileKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        ViolationRow {
            id: row.get(2)?,
            violation_type: row.get(3)?,
            severity: row.get(4)?,
            evidence: row.get(5)?,
            timestamp: row.get(6)?,
        },
    ))
}

impl ViolationRow {
    fn into_violation(self) -> Result<Violation> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::CorruptRow(format!("violation id {:?}: {e}", self.id)))?;
        Ok(Violation {
            id,
            violation_type: ViolationType::from(self.violation_type),
            severity: self.severity,
            timestamp: self.timestamp,
            evidence: self.evidence,
        })
    }
}

// Statements shared by single writes and batches

/// Upsert the profile row and append violations not yet persisted.
///
/// Only violations at or after both the newest stored one and `floor` are
/// written, so a stale profile cannot bring back purged rows.
fn put_profile(conn: &Connection, profile: &TrustProfile, floor: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO user_profiles (user_id, guild_id, trust_score, risk_level, confidence, \
             positive_interactions, improvement_streak, created_at, last_updated) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT (user_id, guild_id) DO UPDATE SET \
             trust_score = excluded.trust_score, \
             risk_level = excluded.risk_level, \
             confidence = excluded.confidence, \
             positive_interactions = excluded.positive_interactions, \
             improvement_streak = excluded.improvement_streak, \
             last_updated = excluded.last_updated",
        params![
            profile.key.user_id,
            profile.key.guild_id,
            profile.trust_score,
            profile.risk_level.as_str(),
            profile.confidence,
            profile.positive_interactions as i64,
            profile.improvement_streak as i64,
            profile.created_at,
            profile.last_updated,
        ],
    )?;
    let newest: Option<DateTime<Utc>> = conn.query_row(
        "SELECT MAX(timestamp) FROM violations WHERE user_id = ?1 AND guild_id = ?2",
        params![profile.key.user_id, profile.key.guild_id],
        |r| r.get(0),
    )?;
    let since = newest.map_or(floor, |newest| newest.max(floor));
    for violation in profile.violation_history.iter().filter(|v| v.timestamp >= since) {
        put_violation(conn, &profile.key, violation)?;
    }
    Ok(())
}

fn put_violation(conn: &Connection, key: &ProfileKey, violation: &Violation) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO violations \
             (id, user_id, guild_id, violation_type, severity, evidence, timestamp) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            violation.id.to_string(),
            key.user_id,
            key.guild_id,
            violation.violation_type.as_str(),
            violation.severity,
            violation.evidence,
            violation.timestamp,
        ],
    )?;
    Ok(())
}

fn put_prediction(conn: &Connection, prediction: &TrustPrediction) -> Result<()> {
    let body = serde_json::to_string(prediction)?;
    conn.execute(
        "INSERT OR REPLACE INTO trust_predictions \
             (user_id, guild_id, predicted_score, confidence, horizon_secs, created_at, due_at, body) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            prediction.key.user_id,
            prediction.key.guild_id,
            prediction.predicted_score,
            prediction.confidence,
            prediction.horizon_secs,
            prediction.created_at,
            prediction.due_at(),
            body,
        ],
    )?;
    Ok(())
}

fn delete_prediction(conn: &Connection, key: &ProfileKey) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM trust_predictions WHERE user_id = ?1 AND guild_id = ?2",
        params![key.user_id, key.guild_id],
    )?)
}

fn put_pattern(conn: &Connection, key: &ProfileKey, pattern: &BehavioralPattern) -> Result<()> {
    let now = Utc::now();
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO behavioral_patterns (user_id, guild_id, signal, samples, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (signal, series) in pattern.named_series() {
        let samples = serde_json::to_string(series)?;
        stmt.execute(params![key.user_id, key.guild_id, signal, samples, now])?;
    }
    Ok(())
}

fn put_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO warden_meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn put_quarantine(conn: &Connection, event: &QuarantineEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO quarantine_events (user_id, guild_id, duration_secs, reason, issued_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.key.user_id,
            event.key.guild_id,
            event.duration_secs,
            event.reason,
            event.issued_at,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{BehaviorTracker, InteractionSignals};

    fn store() -> TrustStore {
        TrustStore::in_memory(StoreConfig::default()).unwrap()
    }

    fn sample_profile(now: DateTime<Utc>) -> TrustProfile {
        let mut profile = TrustProfile::new(ProfileKey::new("alice", "guild-1"), now);
        profile.trust_score = 87.25;
        profile.risk_level = RiskLevel::High;
        profile.confidence = 0.8;
        profile.positive_interactions = 12;
        profile.improvement_streak = 3;
        profile.push_violation(
            Violation::new(ViolationType::Spam, 1.0, now - Duration::hours(2)).with_evidence("link flood"),
        );
        profile.push_violation(Violation::new(ViolationType::from("raid"), 0.5, now - Duration::hours(1)));
        profile
    }

    fn prediction(key: &ProfileKey, created_at: DateTime<Utc>, horizon_secs: i64) -> TrustPrediction {
        TrustPrediction {
            key: key.clone(),
            current_score: 80.0,
            predicted_score: 75.0,
            confidence: 0.4,
            horizon_secs,
            trust_trend: -1.0,
            behavioral_trend: 0.5,
            risk_factors: vec!["declining_trust_trend".into()],
            recommendations: vec![],
            created_at,
        }
    }

    #[test]
    fn test_upsert_get_roundtrip_cold_and_warm() {
        let store = store();
        let profile = sample_profile(Utc::now());
        store.upsert_profile(&profile).unwrap();

        let cold = store.get_profile(&profile.key).unwrap().unwrap();
        assert_eq!(cold, profile);
        let warm = store.get_profile(&profile.key).unwrap().unwrap();
        assert_eq!(warm, profile);
        assert_eq!(store.cache_stats().hits, 1);
    }

    #[test]
    fn test_missing_profile() {
        let store = store();
        assert!(store.get_profile(&ProfileKey::new("nobody", "g")).unwrap().is_none());
    }

    #[test]
    fn test_write_invalidates_cache() {
        let store = store();
        let now = Utc::now();
        let mut profile = sample_profile(now);
        store.upsert_profile(&profile).unwrap();
        store.get_profile(&profile.key).unwrap();

        profile.trust_score = 40.0;
        profile.risk_level = RiskLevel::Low;
        store.upsert_profile(&profile).unwrap();
        assert_eq!(store.get_profile(&profile.key).unwrap().unwrap().trust_score, 40.0);

        let violation = Violation::new(ViolationType::Toxicity, 1.0, now);
        store.log_violation(&profile.key, &violation).unwrap();
        let loaded = store.get_profile(&profile.key).unwrap().unwrap();
        assert_eq!(loaded.violation_history.len(), 3);
        assert_eq!(loaded.violation_history.last(), Some(&violation));
    }

    #[test]
    fn test_out_of_range_score_is_clamped_on_load() {
        let store = store();
        let profile = sample_profile(Utc::now());
        store.upsert_profile(&profile).unwrap();
        {
            let conn = store.pool.acquire().unwrap();
            conn.execute("UPDATE user_profiles SET trust_score = 400.0", []).unwrap();
        }
        store.cache.clear();

        let loaded = store.get_profile(&profile.key).unwrap().unwrap();
        assert_eq!(loaded.trust_score, 150.0);
    }

    #[test]
    fn test_get_violations_since() {
        let store = store();
        let now = Utc::now();
        let key = ProfileKey::new("bob", "g");
        store
            .log_violation(&key, &Violation::new(ViolationType::Spam, 1.0, now - Duration::days(3)))
            .unwrap();
        store
            .log_violation(&key, &Violation::new(ViolationType::CapsAbuse, 1.0, now - Duration::hours(1)))
            .unwrap();

        let recent = store.get_violations(&key, now - Duration::days(1)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].violation_type, ViolationType::CapsAbuse);
        assert_eq!(store.get_violations(&key, now - Duration::days(7)).unwrap().len(), 2);
    }

    #[test]
    fn test_prediction_supersedes_and_retires() {
        let store = store();
        let now = Utc::now();
        let key = ProfileKey::new("carol", "g");

        store.store_prediction(&prediction(&key, now - Duration::hours(2), 3600)).unwrap();
        let newer = prediction(&key, now, 3600);
        store.store_prediction(&newer).unwrap();

        assert_eq!(store.get_prediction(&key).unwrap(), Some(newer));
        assert_eq!(store.list_predictions().unwrap().len(), 1);
        assert!(store.due_predictions(now).unwrap().is_empty());
        assert_eq!(store.due_predictions(now + Duration::hours(1)).unwrap().len(), 1);

        assert!(store.retire_prediction(&key).unwrap());
        assert!(!store.retire_prediction(&key).unwrap());
        assert_eq!(store.get_prediction(&key).unwrap(), None);
    }

    #[test]
    fn test_pattern_roundtrip() {
        let store = store();
        let now = Utc::now();
        let key = ProfileKey::new("dave", "g");
        let tracker = BehaviorTracker::default();
        let mut pattern = tracker.new_pattern();
        tracker.record(&mut pattern, &InteractionSignals::new(0.9).with_mentions(2), now);
        tracker.record_trust_score(&mut pattern, 101.5, now);
        pattern.series_mut("voice_minutes").push(now, 12.0);

        store.save_pattern(&key, &pattern).unwrap();
        assert_eq!(store.load_pattern(&key).unwrap(), Some(pattern.clone()));
        assert_eq!(store.list_patterns().unwrap(), vec![(key, pattern)]);
        assert!(store.load_pattern(&ProfileKey::new("x", "g")).unwrap().is_none());
    }

    #[test]
    fn test_batch_rolls_back_on_failure() {
        let store = store();
        let now = Utc::now();
        let profile = sample_profile(now);
        let mut bad = Violation::new(ViolationType::Spam, 1.0, now);
        bad.severity = -1.0;

        let result = store.write_batch(&[
            WriteOp::UpsertProfile(Box::new(profile.clone())),
            WriteOp::LogViolation(profile.key.clone(), bad),
        ]);
        assert!(result.is_err());
        assert!(store.get_profile(&profile.key).unwrap().is_none());

        store
            .write_batch(&[
                WriteOp::UpsertProfile(Box::new(profile.clone())),
                WriteOp::RecordQuarantine(QuarantineEvent {
                    key: profile.key.clone(),
                    duration_secs: 600,
                    reason: "test".into(),
                    issued_at: now,
                }),
            ])
            .unwrap();
        assert_eq!(store.get_profile(&profile.key).unwrap(), Some(profile.clone()));
        assert_eq!(store.quarantines_for(&profile.key).unwrap().len(), 1);
    }

    #[test]
    fn test_list_profiles_groups_violations() {
        let store = store();
        let now = Utc::now();
        let a = sample_profile(now);
        let b = TrustProfile::new(ProfileKey::new("erin", "guild-2"), now);
        store.upsert_profile(&a).unwrap();
        store.upsert_profile(&b).unwrap();

        let profiles = store.list_profiles().unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(store.profile_count().unwrap(), 2);
        let loaded_a = profiles.iter().find(|p| p.key == a.key).unwrap();
        assert_eq!(loaded_a.violation_history.len(), 2);
        let loaded_b = profiles.iter().find(|p| p.key == b.key).unwrap();
        assert!(loaded_b.violation_history.is_empty());
    }

    #[test]
    fn test_meta_get_set() {
        let store = store();
        assert_eq!(store.get_meta("score_weights").unwrap(), None);
        store.set_meta("score_weights", "{}").unwrap();
        store.set_meta("score_weights", "{\"behavioral\":0.3}").unwrap();
        assert_eq!(
            store.get_meta("score_weights").unwrap().as_deref(),
            Some("{\"behavioral\":0.3}")
        );
    }

    #[test]
    fn test_maintenance_purges_old_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(StoreConfig::default().with_path(dir.path().join("warden.db"))).unwrap();
        let now = Utc::now();
        let key = ProfileKey::new("frank", "g");

        store
            .log_violation(&key, &Violation::new(ViolationType::Spam, 1.0, now - Duration::days(120)))
            .unwrap();
        store
            .log_violation(&key, &Violation::new(ViolationType::Spam, 1.0, now - Duration::days(10)))
            .unwrap();
        store
            .record_quarantine(&QuarantineEvent {
                key: key.clone(),
                duration_secs: 600,
                reason: "old".into(),
                issued_at: now - Duration::days(100),
            })
            .unwrap();

        let report = store.run_maintenance(now).unwrap();
        assert_eq!(report.violations_purged, 1);
        assert_eq!(report.quarantines_purged, 1);
        assert_eq!(store.get_violations(&key, now - Duration::days(365)).unwrap().len(), 1);
        assert_eq!(store.quarantine_count().unwrap(), 0);
    }

    #[test]
    fn test_pattern_keys_and_delete() {
        let store = store();
        let tracker = BehaviorTracker::default();
        let now = Utc::now();
        let a = ProfileKey::new("gil", "g");
        let b = ProfileKey::new("hal", "g");
        for key in [&a, &b] {
            let mut pattern = tracker.new_pattern();
            tracker.record(&mut pattern, &InteractionSignals::new(0.5), now);
            store.save_pattern(key, &pattern).unwrap();
        }
        assert!(store.load_pattern(&a).unwrap().is_some());

        assert_eq!(store.pattern_keys().unwrap(), vec![a.clone(), b.clone()]);
        assert!(store.delete_pattern(&a).unwrap());
        assert!(!store.delete_pattern(&a).unwrap());
        assert!(store.load_pattern(&a).unwrap().is_none());
        assert_eq!(store.pattern_keys().unwrap(), vec![b]);
    }

    #[test]
    fn test_stale_profile_does_not_restore_purged_violations() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(StoreConfig::default().with_path(dir.path().join("warden.db"))).unwrap();
        let now = Utc::now();
        let mut stale = TrustProfile::new(ProfileKey::new("ivy", "g"), now - Duration::days(200));
        stale.push_violation(Violation::new(ViolationType::Spam, 1.0, now - Duration::days(120)));
        stale.push_violation(Violation::new(ViolationType::Toxicity, 1.0, now - Duration::days(30)));
        store
            .log_violation(&stale.key, &stale.violation_history[0])
            .unwrap();
        store
            .log_violation(&stale.key, &stale.violation_history[1])
            .unwrap();

        assert_eq!(store.run_maintenance(now).unwrap().violations_purged, 1);
        store.upsert_profile(&stale).unwrap();
        let kept = store.get_violations(&stale.key, now - Duration::days(365)).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].violation_type, ViolationType::Toxicity);

        let fresh = Violation::new(ViolationType::CapsAbuse, 1.0, now);
        stale.push_violation(fresh.clone());
        store.upsert_profile(&stale).unwrap();
        let loaded = store.get_profile(&stale.key).unwrap().unwrap();
        assert_eq!(loaded.violation_history.len(), 2);
        assert_eq!(loaded.violation_history.last(), Some(&fresh));
    }
}
