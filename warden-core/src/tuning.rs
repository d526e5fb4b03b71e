//! Weight self-tuning
//!
//! Scores expired predictions against the realized trust score and nudges the
//! calculator weights with a fixed-step rule. This is a heuristic correction
//! loop and deliberately not an optimizer.

use serde::{Deserialize, Serialize};

use crate::{ScoreWeights, TrustPrediction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Relative step applied to every weight
    pub learning_rate: f64,
    /// Accuracy above which a prediction counts as a success
    pub success_threshold: f64,
    /// Model accuracy below which weights shrink
    pub shrink_below: f64,
    /// Lower bound of the grow band, checked only when the weights did not shrink
    pub grow_from: f64,
    /// Upper bound (exclusive) of the grow band
    pub grow_below: f64,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            success_threshold: 0.7,
            shrink_below: 0.6,
            grow_from: 0.5,
            grow_below: 0.6,
            min_weight: 0.05,
            max_weight: 0.5,
        }
    }
}

/// What the last tuning pass did to the weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningOutcome {
    Shrunk,
    Grown,
    Unchanged,
    /// No prediction has been evaluated yet
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    /// Predictions scored in this pass
    pub evaluated: usize,
    pub model_accuracy: Option<f64>,
    pub outcome: TuningOutcome,
    pub weights: ScoreWeights,
}

/// Running success/failure tally
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeightTuner {
    pub config: TunerConfig,
    pub successes: u64,
    pub failures: u64,
}

impl WeightTuner {
    pub fn new(config: TunerConfig) -> Self {
        Self {
            config,
            successes: 0,
            failures: 0,
        }
    }

    /// Score one prediction and update the tally. Returns its accuracy.
    pub fn record(&mut self, prediction: &TrustPrediction, actual: f64) -> f64 {
        let accuracy = prediction.accuracy(actual);
        if accuracy > self.config.success_threshold {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        accuracy
    }

    /// `successes / (successes + failures)`
    pub fn model_accuracy(&self) -> Option<f64> {
        let total = self.successes + self.failures;
        if total == 0 {
            None
        } else {
            Some(self.successes as f64 / total as f64)
        }
    }

    pub fn evaluated(&self) -> u64 {
        self.successes + self.failures
    }

    /// Apply the update rule to `weights` given the current model accuracy.
    ///
    /// Shrinking takes precedence, so with the default thresholds the grow band
    /// is shadowed and every accuracy below 0.6 shrinks.
    pub fn adjust(&self, weights: &ScoreWeights) -> (ScoreWeights, TuningOutcome) {
        let cfg = &self.config;
        match self.model_accuracy() {
            None => (*weights, TuningOutcome::NoData),
            Some(acc) if acc < cfg.shrink_below => (
                weights.scaled(1.0 - cfg.learning_rate, cfg.min_weight, cfg.max_weight),
                TuningOutcome::Shrunk,
            ),
            Some(acc) if acc >= cfg.grow_from && acc < cfg.grow_below => (
                weights.scaled(1.0 + cfg.learning_rate / 2.0, cfg.min_weight, cfg.max_weight),
                TuningOutcome::Grown,
            ),
            Some(_) => (*weights, TuningOutcome::Unchanged),
        }
    }

    /// Score a batch of `(prediction, realized score)` pairs and adjust
    pub fn tune(&mut self, evaluations: &[(TrustPrediction, f64)], weights: &ScoreWeights) -> TuningReport {
        for (prediction, actual) in evaluations {
            self.record(prediction, *actual);
        }
        let (weights, outcome) = if evaluations.is_empty() {
            (*weights, TuningOutcome::Unchanged)
        } else {
            self.adjust(weights)
        };
        TuningReport {
            evaluated: evaluations.len(),
            model_accuracy: self.model_accuracy(),
            outcome,
            weights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProfileKey;
    use chrono::Utc;

    fn prediction(predicted: f64) -> TrustPrediction {
        TrustPrediction {
            key: ProfileKey::new("u", "g"),
            current_score: predicted,
            predicted_score: predicted,
            confidence: 0.5,
            horizon_secs: 3600,
            trust_trend: 0.0,
            behavioral_trend: 0.0,
            risk_factors: Vec::new(),
            recommendations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_tallies() {
        let mut tuner = WeightTuner::default();
        assert!((tuner.record(&prediction(100.0), 95.0) - 0.95).abs() < 1e-12);
        tuner.record(&prediction(100.0), 40.0);

        assert_eq!(tuner.successes, 1);
        assert_eq!(tuner.failures, 1);
        assert_eq!(tuner.model_accuracy(), Some(0.5));
    }

    #[test]
    fn test_low_accuracy_shrinks() {
        let mut tuner = WeightTuner::default();
        let evals = vec![(prediction(100.0), 10.0), (prediction(100.0), 20.0)];

        let report = tuner.tune(&evals, &ScoreWeights::default());
        assert_eq!(report.outcome, TuningOutcome::Shrunk);
        assert!((report.weights.behavioral - 0.297).abs() < 1e-12);
        assert!((report.weights.violation - 0.396).abs() < 1e-12);
    }

    #[test]
    fn test_marginal_accuracy_shrinks() {
        let mut tuner = WeightTuner::default();
        tuner.successes = 11;
        tuner.failures = 9;
        assert_eq!(tuner.model_accuracy(), Some(0.55));

        let (weights, outcome) = tuner.adjust(&ScoreWeights::default());
        assert_eq!(outcome, TuningOutcome::Shrunk);
        assert!((weights.positive - 0.198).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_at_threshold_unchanged() {
        let tuner = WeightTuner {
            successes: 3,
            failures: 2,
            ..Default::default()
        };
        assert_eq!(tuner.adjust(&ScoreWeights::default()).1, TuningOutcome::Unchanged);
    }

    #[test]
    fn test_grow_band_when_shrink_lowered() {
        let tuner = WeightTuner {
            config: TunerConfig {
                shrink_below: 0.5,
                ..Default::default()
            },
            successes: 11,
            failures: 9,
        };

        let (weights, outcome) = tuner.adjust(&ScoreWeights::default());
        assert_eq!(outcome, TuningOutcome::Grown);
        assert!((weights.positive - 0.201).abs() < 1e-12);
    }

    #[test]
    fn test_good_accuracy_unchanged() {
        let mut tuner = WeightTuner::default();
        let evals = vec![(prediction(80.0), 82.0), (prediction(60.0), 61.0)];

        let report = tuner.tune(&evals, &ScoreWeights::default());
        assert_eq!(report.outcome, TuningOutcome::Unchanged);
        assert_eq!(report.weights, ScoreWeights::default());
        assert_eq!(report.model_accuracy, Some(1.0));
    }

    #[test]
    fn test_weights_stay_in_bounds() {
        let tuner = WeightTuner {
            failures: 10,
            ..Default::default()
        };
        let mut weights = ScoreWeights::default();
        for _ in 0..1000 {
            weights = tuner.adjust(&weights).0;
        }
        assert_eq!(weights.as_array(), [0.05, 0.05, 0.05]);
    }

    #[test]
    fn test_no_data() {
        let tuner = WeightTuner::default();
        assert_eq!(tuner.adjust(&ScoreWeights::default()).1, TuningOutcome::NoData);
    }
}
