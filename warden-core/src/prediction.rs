//! Trend-based trust prediction
//!
//! Extrapolates the recent trust and behavioral trajectories over a horizon.
//! The slope estimator is a strategy chosen when the predictor is built.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{clamp_trust, BehavioralPattern, ProfileKey, TrustError, TrustProfile, NEUTRAL_TRUST};

pub const RISK_DECLINING_TREND: &str = "declining_trust_trend";
pub const RISK_NEGATIVE_BEHAVIOR: &str = "negative_behavior_trend";
pub const RISK_MULTIPLE_VIOLATIONS: &str = "multiple_violations";
pub const RISK_LOW_PREDICTED: &str = "low_predicted_trust";
pub const RISK_INSUFFICIENT_DATA: &str = "insufficient_data";

/// Slope of a series sampled at unit spacing
pub trait TrendEstimator: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Change per sample. Fewer than two values yield 0.
    fn slope(&self, values: &[f64]) -> f64;
}

/// Ordinary least-squares fit over the sample index
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastSquares;

impl TrendEstimator for LeastSquares {
    fn name(&self) -> &'static str {
        "least_squares"
    }

    fn slope(&self, values: &[f64]) -> f64 {
        let n = values.len();
        if n < 2 {
            return 0.0;
        }
        let mean_x = (n - 1) as f64 / 2.0;
        let mean_y = values.iter().sum::<f64>() / n as f64;

        let (num, den) = values
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(num, den), (i, y)| {
                let dx = i as f64 - mean_x;
                (num + dx * (y - mean_y), den + dx * dx)
            });

        if den > 0.0 {
            num / den
        } else {
            0.0
        }
    }
}

/// Slope between the first and last sample
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoPointSlope;

impl TrendEstimator for TwoPointSlope {
    fn name(&self) -> &'static str {
        "two_point"
    }

    fn slope(&self, values: &[f64]) -> f64 {
        match (values.first(), values.last()) {
            (Some(first), Some(last)) if values.len() >= 2 => {
                (last - first) / (values.len() - 1) as f64
            }
            _ => 0.0,
        }
    }
}

/// Which estimator a predictor is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    #[default]
    LeastSquares,
    TwoPoint,
}

impl EstimatorKind {
    pub fn build(self) -> Box<dyn TrendEstimator> {
        match self {
            EstimatorKind::LeastSquares => Box::new(LeastSquares),
            EstimatorKind::TwoPoint => Box::new(TwoPointSlope),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub estimator: EstimatorKind,
    /// Samples considered for each trend
    pub history_window: usize,
    /// Weight of trust trend per hour of horizon
    pub trust_trend_factor: f64,
    /// Weight of behavioral trend per hour of horizon
    pub behavior_trend_factor: f64,
    /// Daily decay applied over the horizon above neutral
    pub decay_rate: f64,
    pub default_horizon_secs: i64,
    pub declining_trend_threshold: f64,
    pub negative_behavior_threshold: f64,
    pub violation_count_threshold: usize,
    pub low_score_threshold: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorKind::LeastSquares,
            history_window: 10,
            trust_trend_factor: 0.1,
            behavior_trend_factor: 0.05,
            decay_rate: 0.99,
            default_horizon_secs: 86_400,
            declining_trend_threshold: -5.0,
            negative_behavior_threshold: -10.0,
            violation_count_threshold: 5,
            low_score_threshold: 30.0,
        }
    }
}

/// Forecast for one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustPrediction {
    pub key: ProfileKey,
    /// Score when the prediction was made
    pub current_score: f64,
    pub predicted_score: f64,
    pub confidence: f64,
    pub horizon_secs: i64,
    pub trust_trend: f64,
    pub behavioral_trend: f64,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TrustPrediction {
    pub fn horizon(&self) -> Duration {
        Duration::seconds(self.horizon_secs)
    }

    /// When the prediction can be scored against reality
    pub fn due_at(&self) -> DateTime<Utc> {
        self.created_at + self.horizon()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.due_at()
    }

    /// `1 - |actual - predicted| / 100`, clamped to `[0, 1]`
    pub fn accuracy(&self, actual: f64) -> f64 {
        (1.0 - (actual - self.predicted_score).abs() / 100.0).clamp(0.0, 1.0)
    }
}

#[derive(Debug)]
pub struct TrendPredictor {
    pub config: PredictorConfig,
    estimator: Box<dyn TrendEstimator>,
}

impl Default for TrendPredictor {
    fn default() -> Self {
        Self::new(PredictorConfig::default())
    }
}

impl TrendPredictor {
    pub fn new(config: PredictorConfig) -> Self {
        let estimator = config.estimator.build();
        Self { config, estimator }
    }

    /// Use a custom estimator instead of the configured one
    pub fn with_estimator(config: PredictorConfig, estimator: Box<dyn TrendEstimator>) -> Self {
        Self { config, estimator }
    }

    pub fn estimator_name(&self) -> &'static str {
        self.estimator.name()
    }

    pub fn default_horizon(&self) -> Duration {
        Duration::seconds(self.config.default_horizon_secs)
    }

    /// Forecast the profile's score `horizon` from `now`.
    ///
    /// Without enough score history this falls back to a low-confidence
    /// prediction equal to the current score.
    pub fn predict(
        &self,
        profile: &TrustProfile,
        pattern: &BehavioralPattern,
        horizon: Duration,
        now: DateTime<Utc>,
    ) -> TrustPrediction {
        match self.try_predict(profile, pattern, horizon, now) {
            Ok(prediction) => prediction,
            Err(TrustError::PredictionUnavailable { samples }) => {
                self.fallback(profile, samples, horizon, now)
            }
            Err(_) => self.fallback(profile, pattern.trust_score.len(), horizon, now),
        }
    }

    /// Forecast, or `PredictionUnavailable` with fewer than two score samples
    pub fn try_predict(
        &self,
        profile: &TrustProfile,
        pattern: &BehavioralPattern,
        horizon: Duration,
        now: DateTime<Utc>,
    ) -> crate::Result<TrustPrediction> {
        let cfg = &self.config;
        let scores = pattern.trust_score.recent_values(cfg.history_window);
        if scores.len() < 2 {
            return Err(TrustError::PredictionUnavailable {
                samples: scores.len(),
            });
        }

        let trust_trend = self.estimator.slope(&scores);
        let behavioral_trend = behavioral_trend(
            &pattern
                .behavioral_score
                .recent_values(cfg.history_window),
        );

        let hours = horizon.num_seconds().max(0) as f64 / 3600.0;
        let current = profile.trust_score;
        let projected = current
            + trust_trend * hours * cfg.trust_trend_factor
            + behavioral_trend * hours * cfg.behavior_trend_factor;
        let predicted_score = clamp_trust(projected * self.time_decay_factor(projected, horizon));

        let mut risk_factors = Vec::new();
        if trust_trend < cfg.declining_trend_threshold {
            risk_factors.push(RISK_DECLINING_TREND.to_string());
        }
        if behavioral_trend < cfg.negative_behavior_threshold {
            risk_factors.push(RISK_NEGATIVE_BEHAVIOR.to_string());
        }
        if profile.violation_history.len() > cfg.violation_count_threshold {
            risk_factors.push(RISK_MULTIPLE_VIOLATIONS.to_string());
        }
        if predicted_score < cfg.low_score_threshold {
            risk_factors.push(RISK_LOW_PREDICTED.to_string());
        }

        Ok(TrustPrediction {
            key: profile.key.clone(),
            current_score: current,
            predicted_score,
            confidence: confidence_for(pattern.trust_score.len()),
            horizon_secs: horizon.num_seconds(),
            trust_trend,
            behavioral_trend,
            recommendations: recommendations_for(&risk_factors),
            risk_factors,
            created_at: now,
        })
    }

    /// Decay over the horizon, applied only above neutral
    pub fn time_decay_factor(&self, projected: f64, horizon: Duration) -> f64 {
        if projected > NEUTRAL_TRUST {
            let days = horizon.num_seconds().max(0) as f64 / 86_400.0;
            self.config.decay_rate.powf(days * 0.5)
        } else {
            1.0
        }
    }

    fn fallback(
        &self,
        profile: &TrustProfile,
        samples: usize,
        horizon: Duration,
        now: DateTime<Utc>,
    ) -> TrustPrediction {
        let risk_factors = vec![RISK_INSUFFICIENT_DATA.to_string()];
        TrustPrediction {
            key: profile.key.clone(),
            current_score: profile.trust_score,
            predicted_score: profile.trust_score,
            confidence: confidence_for(samples),
            horizon_secs: horizon.num_seconds(),
            trust_trend: 0.0,
            behavioral_trend: 0.0,
            recommendations: recommendations_for(&risk_factors),
            risk_factors,
            created_at: now,
        }
    }
}

/// `min(0.9, 0.3 + data_points / 100)`
pub fn confidence_for(data_points: usize) -> f64 {
    (0.3 + data_points as f64 / 100.0).min(0.9)
}

/// `(last - first) / count`
pub fn behavioral_trend(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(first), Some(last)) => (last - first) / values.len() as f64,
        _ => 0.0,
    }
}

/// Fixed recommendation lookup over the raised risk factors
pub fn recommendations_for(risk_factors: &[String]) -> Vec<String> {
    let has = |name: &str| risk_factors.iter().any(|f| f == name);
    let mut out = Vec::new();

    if has(RISK_LOW_PREDICTED) {
        out.push("Immediate intervention recommended".to_string());
    }
    if has(RISK_DECLINING_TREND) && has(RISK_NEGATIVE_BEHAVIOR) {
        out.push("Send a community guidelines reminder".to_string());
    } else if has(RISK_DECLINING_TREND) {
        out.push("Monitor closely for continued decline".to_string());
    } else if has(RISK_NEGATIVE_BEHAVIOR) {
        out.push("Review recent messages for behavioral changes".to_string());
    }
    if has(RISK_MULTIPLE_VIOLATIONS) {
        out.push("Consider temporary restrictions".to_string());
    }
    if has(RISK_INSUFFICIENT_DATA) {
        out.push("Collect more interaction data before acting".to_string());
    }
    if out.is_empty() {
        out.push("Continue normal monitoring".to_string());
    }
    out
}
