//! Quarantine decisions
//!
//! A quarantine is only considered when both the score and the assessment
//! confidence clear their thresholds. Durations double with each quarantine
//! issued inside the lookback window, up to a cap. Applying the restriction is
//! left to the moderation layer that receives the event.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{BehavioralPattern, ProfileKey, RiskAssessment};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantinePolicy {
    /// Minimum score for a quarantine to be considered
    pub auto_quarantine_threshold: f64,
    /// Confidence must be strictly above this
    pub min_confidence: f64,
    pub base_duration_secs: i64,
    pub max_duration_secs: i64,
    /// Window counted for progressive durations
    pub lookback_secs: i64,
}

impl Default for QuarantinePolicy {
    fn default() -> Self {
        Self {
            auto_quarantine_threshold: 85.0,
            min_confidence: 0.8,
            base_duration_secs: 600,
            max_duration_secs: 86_400,
            lookback_secs: 86_400,
        }
    }
}

/// Quarantine issued for a user, handed to the moderation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEvent {
    pub key: ProfileKey,
    pub duration_secs: i64,
    pub reason: String,
    pub issued_at: DateTime<Utc>,
}

impl QuarantineEvent {
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_secs)
    }
}

impl QuarantinePolicy {
    /// Whether the score and confidence allow a quarantine at all
    pub fn should_consider(&self, score: f64, confidence: f64) -> bool {
        score >= self.auto_quarantine_threshold && confidence > self.min_confidence
    }

    /// `base * 2^prior`, capped at `max_duration_secs`
    pub fn duration_for(&self, prior_quarantines: usize) -> Duration {
        let shift = prior_quarantines.min(32) as u32;
        let secs = self
            .base_duration_secs
            .max(0)
            .saturating_mul(1_i64 << shift)
            .min(self.max_duration_secs);
        Duration::seconds(secs)
    }

    /// Decide whether to quarantine after an assessment
    pub fn evaluate(
        &self,
        key: &ProfileKey,
        score: f64,
        assessment: &RiskAssessment,
        pattern: &BehavioralPattern,
        now: DateTime<Utc>,
    ) -> Option<QuarantineEvent> {
        if !self.should_consider(score, assessment.confidence) {
            return None;
        }

        let since = now - Duration::seconds(self.lookback_secs);
        let prior = pattern.quarantines_since(since);
        let duration = self.duration_for(prior);

        Some(QuarantineEvent {
            key: key.clone(),
            duration_secs: duration.num_seconds(),
            reason: format!(
                "risk {} (score {:.1}, confidence {:.2}), {} prior quarantine(s) in window",
                assessment.level, score, assessment.confidence, prior
            ),
            issued_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RiskAssessor, RiskLevel};
    use crate::risk::BehaviorTrend;

    fn assessment(confidence: f64) -> RiskAssessment {
        RiskAssessment {
            level: RiskLevel::Critical,
            confidence,
            score_level: RiskLevel::Critical,
            trend: BehaviorTrend::Unknown,
            volatility: 0.0,
        }
    }

    #[test]
    fn test_never_quarantines_at_or_below_confidence() {
        let policy = QuarantinePolicy::default();
        let key = ProfileKey::new("u", "g");
        let pattern = BehavioralPattern::new();
        let now = Utc::now();

        for score in [85.0, 100.0, 150.0] {
            for confidence in [0.0, 0.5, 0.8] {
                assert!(policy
                    .evaluate(&key, score, &assessment(confidence), &pattern, now)
                    .is_none());
            }
        }
    }

    #[test]
    fn test_quarantine_requires_threshold() {
        let policy = QuarantinePolicy::default();
        let key = ProfileKey::new("u", "g");
        let pattern = BehavioralPattern::new();
        let now = Utc::now();

        assert!(policy
            .evaluate(&key, 84.9, &assessment(0.95), &pattern, now)
            .is_none());

        let event = policy
            .evaluate(&key, 96.0, &assessment(0.9), &pattern, now)
            .expect("quarantine expected");
        assert_eq!(event.duration_secs, 600);
        assert_eq!(event.key, key);
    }

    #[test]
    fn test_progressive_duration() {
        let policy = QuarantinePolicy::default();
        assert_eq!(policy.duration_for(0), Duration::minutes(10));
        assert_eq!(policy.duration_for(1), Duration::minutes(20));
        assert_eq!(policy.duration_for(3), Duration::minutes(80));
        assert_eq!(policy.duration_for(10), Duration::hours(24));
        assert_eq!(policy.duration_for(500), Duration::hours(24));
    }

    #[test]
    fn test_prior_quarantines_counted_in_window() {
        let policy = QuarantinePolicy::default();
        let key = ProfileKey::new("u", "g");
        let now = Utc::now();
        let mut pattern = BehavioralPattern::new();
        pattern.quarantines.push(now - Duration::hours(30), 600.0);
        pattern.quarantines.push(now - Duration::hours(2), 600.0);
        pattern.quarantines.push(now - Duration::minutes(20), 1200.0);

        let event = policy
            .evaluate(&key, 100.0, &assessment(0.9), &pattern, now)
            .expect("quarantine expected");
        assert_eq!(event.duration(), Duration::minutes(40));
    }

    #[test]
    fn test_assessor_output_feeds_policy() {
        let policy = QuarantinePolicy::default();
        let pattern = BehavioralPattern::new();
        let a = RiskAssessor::default().assess(100.0, &pattern);

        // Critical baseline confidence 0.9 clears the bar
        assert!(policy.should_consider(100.0, a.confidence));

        let a = RiskAssessor::default().assess(88.0, &pattern);
        // High baseline confidence 0.8 does not
        assert!(!policy.should_consider(88.0, a.confidence));
    }
}
