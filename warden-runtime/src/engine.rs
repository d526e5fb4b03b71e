//! Trust engine - async front end over the domain and the store
//!
//! Constructed once and shared through an `Arc`. Every storage call runs on the
//! blocking pool under a timeout. Updates to one profile are serialized by a
//! per-profile lock, so a score is never computed from two concurrent reads.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use warden_core::{
    AnalyticsSummary, BehaviorTracker, BehavioralPattern, InteractionSignals, ProfileKey,
    QuarantineEvent, QuarantinePolicy, RiskAssessment, RiskAssessor, ScoreBreakdown,
    ScoreWeights, TrendPredictor, TrustCalculator, TrustError, TrustPrediction, TrustProfile,
    TuningReport, Violation, ViolationType, WeightTuner,
};
use warden_store::{CacheStats, MaintenanceReport, PoolState, StoreError, TrustStore, WriteOp};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::locks::KeyedLocks;
use crate::snapshot::{PatternRecord, Snapshot, SnapshotSummary};
use crate::supervisor::TaskSupervisor;

const META_WEIGHTS: &str = "score_weights";
const META_TUNER: &str = "weight_tuner";

/// Outcome of one processed interaction
#[derive(Debug, Clone, Serialize)]
pub struct TrustUpdate {
    pub profile: TrustProfile,
    pub breakdown: ScoreBreakdown,
    pub assessment: RiskAssessment,
    /// Quarantine issued by this interaction, also sent on the event channel
    pub quarantine: Option<QuarantineEvent>,
}

#[derive(Debug, Default)]
struct Counters {
    interactions: AtomicU64,
    violations: AtomicU64,
    quarantines: AtomicU64,
    predictions: AtomicU64,
    storage_failures: AtomicU64,
    fallbacks: AtomicU64,
}

/// Engine counters since start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub interactions: u64,
    pub violations: u64,
    pub quarantines: u64,
    pub predictions: u64,
    pub storage_failures: u64,
    pub fallbacks: u64,
    pub tracked_patterns: usize,
}

/// Analytics summary plus storage and engine health
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub summary: AnalyticsSummary,
    pub cache: CacheStats,
    pub pool: PoolState,
    pub engine: EngineStats,
}

/// Result of one pattern cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatternCleanup {
    pub retained: usize,
    pub dropped: usize,
    /// Patterns removed from the store after losing every sample
    pub deleted: usize,
    pub pruned_samples: usize,
}

/// The trust engine
pub struct TrustEngine {
    store: Arc<TrustStore>,
    config: EngineConfig,
    tracker: BehaviorTracker,
    calculator: TrustCalculator,
    assessor: RiskAssessor,
    policy: QuarantinePolicy,
    predictor: TrendPredictor,
    weights: RwLock<ScoreWeights>,
    tuner: Mutex<WeightTuner>,
    /// In-memory behavioral trackers, loaded lazily from the store
    patterns: RwLock<HashMap<ProfileKey, BehavioralPattern>>,
    /// Profiles as last read or written, served when storage is unavailable
    last_known: RwLock<HashMap<ProfileKey, TrustProfile>>,
    locks: KeyedLocks<ProfileKey>,
    quarantine_tx: mpsc::Sender<QuarantineEvent>,
    quarantine_rx: Option<mpsc::Receiver<QuarantineEvent>>,
    counters: Counters,
}

impl std::fmt::Debug for TrustEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustEngine")
            .field("store", &self.store.path())
            .field("estimator", &self.predictor.estimator_name())
            .finish()
    }
}

impl TrustEngine {
    /// Open the configured database and build the engine
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = TrustStore::open(config.store.clone())?;
        Self::with_store(config, Arc::new(store))
    }

    /// Build the engine on an existing store, restoring tuned weights if present
    pub fn with_store(config: EngineConfig, store: Arc<TrustStore>) -> Result<Self> {
        let (quarantine_tx, quarantine_rx) = mpsc::channel(config.runtime.event_buffer.max(1));

        let mut weights = config.weights;
        if let Some(raw) = store.get_meta(META_WEIGHTS)? {
            match serde_json::from_str(&raw) {
                Ok(saved) => weights = saved,
                Err(e) => warn!(error = %e, "Ignoring unreadable saved weights"),
            }
        }
        let mut tuner = WeightTuner::new(config.tuner.clone());
        if let Some(raw) = store.get_meta(META_TUNER)? {
            match serde_json::from_str::<WeightTuner>(&raw) {
                Ok(saved) => {
                    tuner.successes = saved.successes;
                    tuner.failures = saved.failures;
                }
                Err(e) => warn!(error = %e, "Ignoring unreadable tuner state"),
            }
        }

        let predictor = TrendPredictor::new(config.predictor.clone());
        info!(
            estimator = predictor.estimator_name(),
            behavioral = weights.behavioral,
            violation = weights.violation,
            positive = weights.positive,
            "Trust engine initialized"
        );

        Ok(Self {
            tracker: config.tracker.clone(),
            calculator: TrustCalculator::new(config.calculator.clone()),
            assessor: RiskAssessor::new(config.risk.clone()),
            policy: config.quarantine.clone(),
            predictor,
            weights: RwLock::new(weights),
            tuner: Mutex::new(tuner),
            patterns: RwLock::new(HashMap::new()),
            last_known: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
            quarantine_tx,
            quarantine_rx: Some(quarantine_rx),
            counters: Counters::default(),
            store,
            config,
        })
    }

    /// Take the quarantine event receiver (can only be called once)
    pub fn take_quarantine_events(&mut self) -> Option<mpsc::Receiver<QuarantineEvent>> {
        self.quarantine_rx.take()
    }

    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn weights(&self) -> ScoreWeights {
        *self.weights.read().await
    }

    async fn io<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&TrustStore) -> warden_store::Result<T> + Send + 'static,
    {
        self.io_within(operation, self.config.io_timeout(), f).await
    }

    async fn io_within<T, F>(&self, operation: &'static str, after: std::time::Duration, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&TrustStore) -> warden_store::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let call = tokio::task::spawn_blocking(move || f(store.as_ref()));

        let result = match tokio::time::timeout(after, call).await {
            Ok(Ok(result)) => result.map_err(EngineError::from),
            Ok(Err(join)) => Err(EngineError::TaskFailed(format!("{operation}: {join}"))),
            Err(_) => Err(EngineError::Timeout { operation, after }),
        };
        self.note_failure(operation, &result);
        result
    }

    /// Run a write for `key` while holding its lock.
    ///
    /// A write that times out may still commit. The lock then stays held until
    /// the blocking call settles and the in-memory state for `key` is dropped,
    /// so the next update for that profile starts from what was committed.
    async fn write_locked<F>(
        &self,
        operation: &'static str,
        key: &ProfileKey,
        guard: OwnedMutexGuard<()>,
        f: F,
    ) -> Result<OwnedMutexGuard<()>>
    where
        F: FnOnce(&TrustStore) -> warden_store::Result<()> + Send + 'static,
    {
        let after = self.config.io_timeout();
        let store = Arc::clone(&self.store);
        let mut call = tokio::task::spawn_blocking(move || f(store.as_ref()));

        let outcome = tokio::time::timeout(after, &mut call).await;
        let result = match outcome {
            Ok(Ok(result)) => result.map(|()| guard).map_err(EngineError::from),
            Ok(Err(join)) => Err(EngineError::TaskFailed(format!("{operation}: {join}"))),
            Err(_) => {
                self.forget(key).await;
                let key = key.clone();
                tokio::spawn(async move {
                    let settled = matches!(call.await, Ok(Ok(())));
                    drop(guard);
                    debug!(user = %key, operation, settled, "Late write finished");
                });
                Err(EngineError::Timeout { operation, after })
            }
        };
        self.note_failure(operation, &result);
        result
    }

    fn note_failure<T>(&self, operation: &'static str, result: &Result<T>) {
        if let Err(e) = result {
            if e.is_degraded() {
                self.counters.storage_failures.fetch_add(1, Ordering::Relaxed);
                warn!(operation, error = %e, "Storage call failed");
            }
        }
    }

    /// Drop in-memory state for `key` so it is reloaded from the store
    async fn forget(&self, key: &ProfileKey) {
        self.patterns.write().await.remove(key);
        self.last_known.write().await.remove(key);
    }

    async fn load_profile(&self, key: &ProfileKey, now: DateTime<Utc>) -> Result<TrustProfile> {
        let k = key.clone();
        let stored = self.io("get_profile", move |s| s.get_profile(&k)).await?;
        Ok(stored.unwrap_or_else(|| {
            debug!(user = %key, "Creating profile");
            TrustProfile::new(key.clone(), now)
        }))
    }

    async fn load_pattern(&self, key: &ProfileKey) -> Result<BehavioralPattern> {
        if let Some(pattern) = self.patterns.read().await.get(key) {
            return Ok(pattern.clone());
        }
        let k = key.clone();
        let stored = self.io("load_pattern", move |s| s.load_pattern(&k)).await?;
        Ok(stored.unwrap_or_else(|| self.tracker.new_pattern()))
    }

    async fn remember(&self, profile: &TrustProfile) {
        self.last_known
            .write()
            .await
            .insert(profile.key.clone(), profile.clone());
    }

    fn emit_quarantine(&self, event: QuarantineEvent) {
        match self.quarantine_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(user = %event.key, "Quarantine channel full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Quarantine channel closed");
            }
        }
    }

    // Interaction path

    /// Record one processed message and return its behavioral score
    pub async fn record_interaction(
        &self,
        key: &ProfileKey,
        signals: &InteractionSignals,
    ) -> Result<f64> {
        let update = self.calculate_trust_score(key, signals).await?;
        Ok(update.breakdown.behavioral_score)
    }

    /// Track the interaction, recompute the score, assess risk and decide on quarantine
    pub async fn calculate_trust_score(
        &self,
        key: &ProfileKey,
        signals: &InteractionSignals,
    ) -> Result<TrustUpdate> {
        self.calculate_trust_score_at(key, signals, Utc::now()).await
    }

    pub async fn calculate_trust_score_at(
        &self,
        key: &ProfileKey,
        signals: &InteractionSignals,
        now: DateTime<Utc>,
    ) -> Result<TrustUpdate> {
        signals.validate()?;
        let guard = self.locks.lock(key).await;

        let mut profile = self.load_profile(key, now).await?;
        let mut pattern = self.load_pattern(key).await?;
        let weights = *self.weights.read().await;

        let behavioral = self.tracker.record(&mut pattern, signals, now);
        let breakdown = self
            .calculator
            .calculate(&mut profile, &pattern, behavioral, &weights, now);
        self.tracker
            .record_trust_score(&mut pattern, breakdown.new_score, now);

        let assessment = self.assessor.apply(&mut profile, &pattern);
        let quarantine =
            self.policy
                .evaluate(key, profile.trust_score, &assessment, &pattern, now);
        if let Some(event) = &quarantine {
            self.tracker
                .record_quarantine(&mut pattern, event.duration(), now);
        }

        let mut ops = vec![
            WriteOp::UpsertProfile(Box::new(profile.clone())),
            WriteOp::SavePattern(key.clone(), Box::new(pattern.clone())),
        ];
        if let Some(event) = &quarantine {
            ops.push(WriteOp::RecordQuarantine(event.clone()));
        }
        let guard = self
            .write_locked("write_batch", key, guard, move |s| s.write_batch(&ops))
            .await?;

        self.patterns.write().await.insert(key.clone(), pattern);
        self.remember(&profile).await;
        drop(guard);
        self.counters.interactions.fetch_add(1, Ordering::Relaxed);

        debug!(
            user = %key,
            score = profile.trust_score,
            behavioral,
            risk = %profile.risk_level,
            "Trust score updated"
        );

        if let Some(event) = &quarantine {
            self.counters.quarantines.fetch_add(1, Ordering::Relaxed);
            info!(
                user = %key,
                duration_secs = event.duration_secs,
                reason = %event.reason,
                "Quarantine issued"
            );
            self.emit_quarantine(event.clone());
        }

        Ok(TrustUpdate {
            profile,
            breakdown,
            assessment,
            quarantine,
        })
    }

    /// Append a violation reported by the classifier
    pub async fn log_violation(
        &self,
        key: &ProfileKey,
        violation_type: ViolationType,
        severity: f64,
        evidence: Option<String>,
    ) -> Result<Violation> {
        if !severity.is_finite() || severity < 0.0 {
            return Err(TrustError::InvalidSignal(format!("violation severity {severity}")).into());
        }
        let now = Utc::now();
        let guard = self.locks.lock(key).await;

        let mut profile = self.load_profile(key, now).await?;
        let mut violation = Violation::new(violation_type, severity, now);
        if let Some(evidence) = evidence {
            violation = violation.with_evidence(evidence);
        }
        profile.push_violation(violation.clone());

        let stored = profile.clone();
        let guard = self
            .write_locked("upsert_profile", key, guard, move |s| s.upsert_profile(&stored))
            .await?;
        self.remember(&profile).await;
        drop(guard);
        self.counters.violations.fetch_add(1, Ordering::Relaxed);

        info!(
            user = %key,
            kind = %violation.violation_type,
            severity,
            "Violation logged"
        );
        Ok(violation)
    }

    /// Current profile, or the last known one if storage is unavailable
    pub async fn get_trust_profile(&self, key: &ProfileKey) -> Result<Option<TrustProfile>> {
        let k = key.clone();
        match self.io("get_profile", move |s| s.get_profile(&k)).await {
            Ok(profile) => {
                if let Some(profile) = &profile {
                    self.remember(profile).await;
                }
                Ok(profile)
            }
            Err(e) if e.is_degraded() => match self.last_known_profile(key).await {
                Some(profile) => {
                    self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                    warn!(user = %key, error = %e, "Serving last known profile");
                    Ok(Some(profile))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    pub async fn last_known_profile(&self, key: &ProfileKey) -> Option<TrustProfile> {
        self.last_known.read().await.get(key).cloned()
    }

    /// Forecast the profile's score `horizon` ahead and store the prediction
    pub async fn predict_future_trust(
        &self,
        key: &ProfileKey,
        horizon: Duration,
    ) -> Result<TrustPrediction> {
        let now = Utc::now();
        let _guard = self.locks.lock(key).await;
        let profile = self.load_profile(key, now).await?;
        let pattern = self.load_pattern(key).await?;

        let prediction = self.predictor.predict(&profile, &pattern, horizon, now);
        let stored = prediction.clone();
        self.io("store_prediction", move |s| s.store_prediction(&stored))
            .await?;
        self.counters.predictions.fetch_add(1, Ordering::Relaxed);

        debug!(
            user = %key,
            predicted = prediction.predicted_score,
            confidence = prediction.confidence,
            "Prediction stored"
        );
        Ok(prediction)
    }

    // Reporting

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            interactions: self.counters.interactions.load(Ordering::Relaxed),
            violations: self.counters.violations.load(Ordering::Relaxed),
            quarantines: self.counters.quarantines.load(Ordering::Relaxed),
            predictions: self.counters.predictions.load(Ordering::Relaxed),
            storage_failures: self.counters.storage_failures.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            tracked_patterns: self.patterns.read().await.len(),
        }
    }

    pub async fn analytics(&self) -> Result<AnalyticsReport> {
        let (profiles, quarantines) = self
            .io("analytics", |s| Ok((s.list_profiles()?, s.quarantine_count()?)))
            .await?;
        let tuner = self.tuner.lock().await.clone();
        let weights = self.weights().await;

        Ok(AnalyticsReport {
            summary: AnalyticsSummary::from_profiles(
                &profiles,
                quarantines,
                &tuner,
                &weights,
                Utc::now(),
            ),
            cache: self.store.cache_stats(),
            pool: self.store.pool_state(),
            engine: self.stats().await,
        })
    }

    /// Write every profile, pattern and outstanding prediction to `path`
    pub async fn export_snapshot(&self, path: &Path) -> Result<SnapshotSummary> {
        let (profiles, patterns, predictions) = self
            .io("export_snapshot", |s| {
                Ok((s.list_profiles()?, s.list_patterns()?, s.list_predictions()?))
            })
            .await?;

        let snapshot = Snapshot {
            version: warden_core::VERSION.to_string(),
            generated_at: Utc::now(),
            weights: self.weights().await,
            profiles,
            patterns: patterns
                .into_iter()
                .map(|(key, pattern)| PatternRecord { key, pattern })
                .collect(),
            predictions,
        };

        let summary = snapshot.write(path).await?;
        info!(
            path = %path.display(),
            profiles = summary.profiles,
            bytes = summary.bytes,
            "Snapshot exported"
        );
        Ok(summary)
    }

    // Background work

    /// Apply the time factor to every profile and re-assess its risk
    pub async fn refresh_all(&self, now: DateTime<Utc>) -> Result<usize> {
        let keys: Vec<ProfileKey> = self
            .io("list_profiles", |s| s.list_profiles())
            .await?
            .into_iter()
            .map(|p| p.key)
            .collect();

        let mut refreshed = 0;
        for key in keys {
            match self.refresh_one(&key, now).await {
                Ok(()) => refreshed += 1,
                Err(e) => warn!(user = %key, error = %e, "Profile refresh failed"),
            }
            tokio::task::yield_now().await;
        }

        debug!(refreshed, "Profiles refreshed");
        Ok(refreshed)
    }

    async fn refresh_one(&self, key: &ProfileKey, now: DateTime<Utc>) -> Result<()> {
        let guard = self.locks.lock(key).await;
        let mut profile = self.load_profile(key, now).await?;
        let pattern = self.load_pattern(key).await?;

        self.calculator.refresh(&mut profile, now);
        self.assessor.apply(&mut profile, &pattern);

        let stored = profile.clone();
        let _guard = self
            .write_locked("upsert_profile", key, guard, move |s| s.upsert_profile(&stored))
            .await?;
        self.remember(&profile).await;
        Ok(())
    }

    /// Predict for recently active profiles that have no outstanding prediction
    pub async fn generate_predictions(&self, now: DateTime<Utc>) -> Result<usize> {
        let (profiles, patterns, outstanding) = self
            .io("prediction_inputs", |s| {
                Ok((s.list_profiles()?, s.list_patterns()?, s.list_predictions()?))
            })
            .await?;

        let outstanding: HashSet<ProfileKey> = outstanding.into_iter().map(|p| p.key).collect();
        let patterns: HashMap<ProfileKey, BehavioralPattern> = patterns.into_iter().collect();
        let cutoff = now - self.config.schedule.active_window();
        let horizon = self.config.schedule.prediction_horizon();

        let mut generated = 0;
        for profile in profiles {
            if outstanding.contains(&profile.key) {
                continue;
            }
            let Some(pattern) = patterns.get(&profile.key) else {
                continue;
            };
            if pattern.last_activity().map_or(true, |at| at < cutoff) {
                continue;
            }

            let prediction = {
                let _guard = self.locks.lock(&profile.key).await;
                let pattern = self.load_pattern(&profile.key).await?;
                self.predictor.predict(&profile, &pattern, horizon, now)
            };
            let stored = prediction.clone();
            match self
                .io("store_prediction", move |s| s.store_prediction(&stored))
                .await
            {
                Ok(()) => generated += 1,
                Err(e) => warn!(user = %prediction.key, error = %e, "Storing prediction failed"),
            }
            tokio::task::yield_now().await;
        }

        self.counters
            .predictions
            .fetch_add(generated as u64, Ordering::Relaxed);
        debug!(generated, "Predictions generated");
        Ok(generated)
    }

    /// Score due predictions against realized scores, adjust weights, retire them.
    ///
    /// The tally, weights and retirements are committed together. On failure
    /// nothing changes, so the same predictions are scored again next pass.
    pub async fn tune_weights(&self, now: DateTime<Utc>) -> Result<TuningReport> {
        let mut tuner = self.tuner.lock().await;
        let due = self
            .io("due_predictions", move |s| s.due_predictions(now))
            .await?;

        let mut evaluations = Vec::with_capacity(due.len());
        let mut ops = Vec::with_capacity(due.len() + 2);
        for prediction in due {
            ops.push(WriteOp::RetirePrediction(prediction.key.clone()));
            let k = prediction.key.clone();
            if let Some(profile) = self.io("get_profile", move |s| s.get_profile(&k)).await? {
                evaluations.push((prediction, profile.trust_score));
            }
        }

        let current = self.weights().await;
        let mut next = tuner.clone();
        let report = next.tune(&evaluations, &current);

        ops.push(WriteOp::SetMeta(
            META_WEIGHTS.to_string(),
            serde_json::to_string(&report.weights).map_err(StoreError::from)?,
        ));
        ops.push(WriteOp::SetMeta(
            META_TUNER.to_string(),
            serde_json::to_string(&next).map_err(StoreError::from)?,
        ));
        self.io("commit_tuning", move |s| s.write_batch(&ops)).await?;

        *tuner = next;
        *self.weights.write().await = report.weights;
        drop(tuner);

        info!(
            evaluated = report.evaluated,
            accuracy = ?report.model_accuracy,
            outcome = ?report.outcome,
            "Weight tuning complete"
        );
        Ok(report)
    }

    /// Purge old rows and compact the database
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let report = self
            .io_within(
                "run_maintenance",
                self.config.maintenance_timeout(),
                move |s| s.run_maintenance(now),
            )
            .await?;
        self.locks.prune().await;
        Ok(report)
    }

    /// Prune old samples from every pattern, in memory or stored.
    ///
    /// Idle patterns are dropped from memory and reload lazily. Patterns left
    /// without any sample are deleted from the store.
    pub async fn cleanup_patterns(&self, now: DateTime<Utc>) -> Result<PatternCleanup> {
        let cutoff = now - self.config.store.retention();
        let mut keys: HashSet<ProfileKey> = self.patterns.read().await.keys().cloned().collect();
        keys.extend(self.io("pattern_keys", |s| s.pattern_keys()).await?);
        let mut report = PatternCleanup::default();

        for key in keys {
            let guard = self.locks.lock(&key).await;
            let mut pattern = self.load_pattern(&key).await?;

            let pruned = pattern.prune_before(cutoff);
            report.pruned_samples += pruned;
            let k = key.clone();
            let _guard = if pattern.sample_count() == 0 {
                let guard = self
                    .write_locked("delete_pattern", &key, guard, move |s| {
                        s.delete_pattern(&k).map(|_| ())
                    })
                    .await?;
                report.deleted += 1;
                guard
            } else if pruned > 0 {
                let stored = pattern.clone();
                self.write_locked("save_pattern", &key, guard, move |s| s.save_pattern(&k, &stored))
                    .await?
            } else {
                guard
            };

            let idle = pattern.last_activity().map_or(true, |at| at < cutoff);
            let mut patterns = self.patterns.write().await;
            if idle {
                if patterns.remove(&key).is_some() {
                    self.last_known.write().await.remove(&key);
                }
                report.dropped += 1;
            } else {
                if patterns.contains_key(&key) {
                    patterns.insert(key.clone(), pattern);
                }
                report.retained += 1;
            }
            drop(patterns);
            tokio::task::yield_now().await;
        }

        self.locks.prune().await;
        debug!(
            retained = report.retained,
            dropped = report.dropped,
            deleted = report.deleted,
            pruned = report.pruned_samples,
            "Pattern cleanup complete"
        );
        Ok(report)
    }

    /// Start the supervised background task set
    pub fn start_background(self: &Arc<Self>) -> TaskSupervisor {
        let schedule = self.config.schedule.clone();
        let mut supervisor = TaskSupervisor::new();

        let engine = Arc::clone(self);
        supervisor.register("profile_refresh", schedule.profile_refresh(), move || {
            let engine = Arc::clone(&engine);
            async move { engine.refresh_all(Utc::now()).await.map(|_| ()) }
        });

        let engine = Arc::clone(self);
        supervisor.register("prediction", schedule.prediction(), move || {
            let engine = Arc::clone(&engine);
            async move { engine.generate_predictions(Utc::now()).await.map(|_| ()) }
        });

        let engine = Arc::clone(self);
        supervisor.register("weight_tuning", schedule.weight_tuning(), move || {
            let engine = Arc::clone(&engine);
            async move { engine.tune_weights(Utc::now()).await.map(|_| ()) }
        });

        let engine = Arc::clone(self);
        supervisor.register(
            "maintenance",
            self.config.store.maintenance_interval(),
            move || {
                let engine = Arc::clone(&engine);
                async move { engine.run_maintenance(Utc::now()).await.map(|_| ()) }
            },
        );

        let engine = Arc::clone(self);
        supervisor.register("pattern_cleanup", schedule.pattern_cleanup(), move || {
            let engine = Arc::clone(&engine);
            async move { engine.cleanup_patterns(Utc::now()).await.map(|_| ()) }
        });

        supervisor.start();
        supervisor
    }
}
