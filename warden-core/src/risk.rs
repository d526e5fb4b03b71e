//! Risk assessment
//!
//! Maps a trust score plus the recent behavioral trend into a risk level with a
//! confidence value.

use serde::{Deserialize, Serialize};

use crate::{BehavioralPattern, RiskLevel, TrustProfile};

/// Direction of the recent behavioral scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorTrend {
    /// Every recent sample was negative
    Negative,
    /// Every recent sample was positive
    Positive,
    Mixed,
    /// Not enough samples to call a trend
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Samples that must agree in sign for a trend
    pub trend_window: usize,
    /// Confidence shift applied by a trend
    pub confidence_nudge: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
    /// Samples used for the volatility figure
    pub volatility_window: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            trend_window: 5,
            confidence_nudge: 0.1,
            min_confidence: 0.1,
            max_confidence: 1.0,
            volatility_window: 10,
        }
    }
}

/// Result of one assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub confidence: f64,
    /// Level implied by the score alone
    pub score_level: RiskLevel,
    pub trend: BehaviorTrend,
    /// Standard deviation of recent behavioral scores
    pub volatility: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAssessor {
    pub config: RiskConfig,
}

impl RiskAssessor {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn assess(&self, score: f64, pattern: &BehavioralPattern) -> RiskAssessment {
        let score_level = RiskLevel::from_score(score);
        let trend = self.trend(pattern);
        let nudge = self.config.confidence_nudge;

        let (level, confidence) = match trend {
            BehaviorTrend::Negative => (score_level.worse(), score_level.baseline_confidence() + nudge),
            BehaviorTrend::Positive => (score_level.better(), score_level.baseline_confidence() - nudge),
            BehaviorTrend::Mixed | BehaviorTrend::Unknown => {
                (score_level, score_level.baseline_confidence())
            }
        };

        RiskAssessment {
            level,
            confidence: confidence.clamp(self.config.min_confidence, self.config.max_confidence),
            score_level,
            trend,
            volatility: self.volatility(pattern),
        }
    }

    /// Assess and store the result on the profile
    pub fn apply(&self, profile: &mut TrustProfile, pattern: &BehavioralPattern) -> RiskAssessment {
        let assessment = self.assess(profile.trust_score, pattern);
        profile.risk_level = assessment.level;
        profile.confidence = assessment.confidence;
        assessment
    }

    pub fn trend(&self, pattern: &BehavioralPattern) -> BehaviorTrend {
        let window = self.config.trend_window.max(1);
        let recent = pattern.behavioral_score.recent_values(window);
        if recent.len() < window {
            return BehaviorTrend::Unknown;
        }
        if recent.iter().all(|v| *v < 0.0) {
            BehaviorTrend::Negative
        } else if recent.iter().all(|v| *v > 0.0) {
            BehaviorTrend::Positive
        } else {
            BehaviorTrend::Mixed
        }
    }

    fn volatility(&self, pattern: &BehavioralPattern) -> f64 {
        let values = pattern
            .behavioral_score
            .recent_values(self.config.volatility_window);
        if values.len() < 2 {
            return 0.0;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        variance.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn pattern_with(values: &[f64]) -> BehavioralPattern {
        let mut pattern = BehavioralPattern::new();
        let now = Utc::now();
        for (i, v) in values.iter().enumerate() {
            pattern.behavioral_score.push(now + Duration::seconds(i as i64), *v);
        }
        pattern
    }

    #[test]
    fn test_baseline_levels() {
        let assessor = RiskAssessor::default();
        let empty = BehavioralPattern::new();

        let a = assessor.assess(100.0, &empty);
        assert_eq!(a.level, RiskLevel::Critical);
        assert!((a.confidence - 0.9).abs() < 1e-12);

        let a = assessor.assess(20.0, &empty);
        assert_eq!(a.level, RiskLevel::Low);
        assert!((a.confidence - 0.6).abs() < 1e-12);
        assert_eq!(a.trend, BehaviorTrend::Unknown);
    }

    #[test]
    fn test_negative_trend_escalates() {
        let assessor = RiskAssessor::default();
        let pattern = pattern_with(&[-5.0, -3.0, -20.0, -1.0, -8.0]);

        let a = assessor.assess(85.0, &pattern);
        assert_eq!(a.score_level, RiskLevel::High);
        assert_eq!(a.level, RiskLevel::Critical);
        assert!((a.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_positive_trend_relaxes() {
        let assessor = RiskAssessor::default();
        let pattern = pattern_with(&[4.0, 10.0, 3.0, 12.0, 7.0]);

        let a = assessor.assess(60.0, &pattern);
        assert_eq!(a.level, RiskLevel::Low);
        assert!((a.confidence - 0.6).abs() < 1e-12);
        assert!(a.volatility > 0.0);
    }

    #[test]
    fn test_mixed_trend_keeps_level() {
        let assessor = RiskAssessor::default();
        let pattern = pattern_with(&[4.0, -10.0, 3.0, 12.0, 7.0]);

        let a = assessor.assess(60.0, &pattern);
        assert_eq!(a.trend, BehaviorTrend::Mixed);
        assert_eq!(a.level, RiskLevel::Medium);
    }

    #[test]
    fn test_confidence_clamped() {
        let assessor = RiskAssessor::new(RiskConfig {
            confidence_nudge: 0.5,
            ..Default::default()
        });
        let pattern = pattern_with(&[-1.0; 5]);

        let a = assessor.assess(100.0, &pattern);
        assert_eq!(a.confidence, 1.0);
    }
}
