//! Population-level trust statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ProfileKey, RiskLevel, ScoreWeights, TrustProfile, WeightTuner, MAX_TRUST};

/// Width of each score histogram bucket
pub const BUCKET_WIDTH: f64 = 25.0;

/// Profiles whose score falls in `[lower, upper)` (the top bucket includes 150)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub generated_at: DateTime<Utc>,
    pub total_profiles: usize,
    pub risk_distribution: BTreeMap<RiskLevel, usize>,
    pub score_buckets: Vec<ScoreBucket>,
    pub mean_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub total_violations: usize,
    pub quarantines_issued: u64,
    pub model_accuracy: Option<f64>,
    pub predictions_evaluated: u64,
    pub weights: ScoreWeights,
    /// Lowest scoring profiles, worst first
    pub lowest: Vec<(ProfileKey, f64)>,
}

impl AnalyticsSummary {
    pub fn from_profiles(
        profiles: &[TrustProfile],
        quarantines_issued: u64,
        tuner: &WeightTuner,
        weights: &ScoreWeights,
        now: DateTime<Utc>,
    ) -> Self {
        let mut risk_distribution: BTreeMap<RiskLevel, usize> =
            RiskLevel::ALL.iter().map(|level| (*level, 0)).collect();
        let bucket_count = (MAX_TRUST / BUCKET_WIDTH).ceil() as usize;
        let mut score_buckets: Vec<ScoreBucket> = (0..bucket_count)
            .map(|i| ScoreBucket {
                lower: i as f64 * BUCKET_WIDTH,
                upper: (i + 1) as f64 * BUCKET_WIDTH,
                count: 0,
            })
            .collect();

        for profile in profiles {
            *risk_distribution.entry(profile.risk_level).or_insert(0) += 1;
            let idx = ((profile.trust_score / BUCKET_WIDTH).floor().max(0.0) as usize)
                .min(bucket_count - 1);
            score_buckets[idx].count += 1;
        }

        let scores: Vec<f64> = profiles.iter().map(|p| p.trust_score).collect();
        let (mean_score, min_score, max_score) = if scores.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                scores.iter().sum::<f64>() / scores.len() as f64,
                scores.iter().cloned().fold(f64::INFINITY, f64::min),
                scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            )
        };

        let mut lowest: Vec<(ProfileKey, f64)> = profiles
            .iter()
            .map(|p| (p.key.clone(), p.trust_score))
            .collect();
        lowest.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        lowest.truncate(5);

        Self {
            generated_at: now,
            total_profiles: profiles.len(),
            risk_distribution,
            score_buckets,
            mean_score,
            min_score,
            max_score,
            total_violations: profiles.iter().map(|p| p.violation_history.len()).sum(),
            quarantines_issued,
            model_accuracy: tuner.model_accuracy(),
            predictions_evaluated: tuner.evaluated(),
            weights: *weights,
            lowest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Violation, ViolationType};

    fn profile(user: &str, score: f64) -> TrustProfile {
        let now = Utc::now();
        let mut p = TrustProfile::new(ProfileKey::new(user, "g"), now);
        p.trust_score = score;
        p.risk_level = RiskLevel::from_score(score);
        p
    }

    #[test]
    fn test_empty_population() {
        let summary = AnalyticsSummary::from_profiles(
            &[],
            0,
            &WeightTuner::default(),
            &ScoreWeights::default(),
            Utc::now(),
        );
        assert_eq!(summary.total_profiles, 0);
        assert_eq!(summary.score_buckets.len(), 6);
        assert_eq!(summary.risk_distribution.values().sum::<usize>(), 0);
        assert_eq!(summary.model_accuracy, None);
    }

    #[test]
    fn test_distribution_and_buckets() {
        let mut noisy = profile("c", 10.0);
        noisy.push_violation(Violation::new(ViolationType::Spam, 1.0, Utc::now()));
        let profiles = vec![profile("a", 150.0), profile("b", 60.0), noisy, profile("d", 99.0)];

        let summary = AnalyticsSummary::from_profiles(
            &profiles,
            3,
            &WeightTuner::default(),
            &ScoreWeights::default(),
            Utc::now(),
        );

        assert_eq!(summary.total_profiles, 4);
        assert_eq!(summary.risk_distribution[&RiskLevel::Critical], 2);
        assert_eq!(summary.risk_distribution[&RiskLevel::Medium], 1);
        assert_eq!(summary.risk_distribution[&RiskLevel::Low], 1);
        assert_eq!(summary.score_buckets[5].count, 1);
        assert_eq!(summary.score_buckets[0].count, 1);
        assert_eq!(summary.total_violations, 1);
        assert_eq!(summary.min_score, 10.0);
        assert_eq!(summary.max_score, 150.0);
        assert_eq!(summary.lowest[0].0.user_id, "c");
        assert_eq!(summary.quarantines_issued, 3);
    }
}
