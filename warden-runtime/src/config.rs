//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use warden_core::{
    BehaviorTracker, CalculatorConfig, PredictorConfig, QuarantinePolicy, RiskConfig,
    ScoreWeights, TunerConfig,
};
use warden_store::StoreConfig;

/// Intervals of the background tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub profile_refresh_secs: u64,
    pub prediction_secs: u64,
    pub weight_tuning_secs: u64,
    pub pattern_cleanup_secs: u64,
    /// Horizon of background predictions
    pub prediction_horizon_secs: i64,
    /// Only profiles updated within this window get background predictions
    pub active_window_days: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            profile_refresh_secs: 15 * 60,
            prediction_secs: 60 * 60,
            weight_tuning_secs: 60 * 60,
            pattern_cleanup_secs: 6 * 60 * 60,
            prediction_horizon_secs: 24 * 60 * 60,
            active_window_days: 7,
        }
    }
}

impl ScheduleConfig {
    pub fn profile_refresh(&self) -> Duration {
        Duration::from_secs(self.profile_refresh_secs)
    }

    pub fn prediction(&self) -> Duration {
        Duration::from_secs(self.prediction_secs)
    }

    pub fn weight_tuning(&self) -> Duration {
        Duration::from_secs(self.weight_tuning_secs)
    }

    pub fn pattern_cleanup(&self) -> Duration {
        Duration::from_secs(self.pattern_cleanup_secs)
    }

    pub fn prediction_horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.prediction_horizon_secs)
    }

    pub fn active_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.active_window_days)
    }
}

/// Full engine configuration, loadable from a partial TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub tracker: BehaviorTracker,
    pub calculator: CalculatorConfig,
    pub weights: ScoreWeights,
    pub risk: RiskConfig,
    pub quarantine: QuarantinePolicy,
    pub predictor: PredictorConfig,
    pub tuner: TunerConfig,
    pub schedule: ScheduleConfig,
    pub runtime: RuntimeConfig,
}

/// Limits of the async layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on any single storage call
    pub io_timeout_ms: u64,
    /// Upper bound on a maintenance pass (ANALYZE and VACUUM)
    pub maintenance_timeout_secs: u64,
    /// Capacity of the quarantine event channel
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 5_000,
            maintenance_timeout_secs: 600,
            event_buffer: 1_024,
        }
    }
}

impl EngineConfig {
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_quarantine(mut self, policy: QuarantinePolicy) -> Self {
        self.quarantine = policy;
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.runtime.io_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.io_timeout_ms)
    }

    pub fn maintenance_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.maintenance_timeout_secs)
    }
}
