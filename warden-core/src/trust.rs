//! Trust score calculation
//!
//! Combines the behavioral score, decayed violation impact and positive
//! interaction bonus into an updated score, then applies a time factor that
//! pulls the score toward neutral.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{clamp_trust, elapsed_days, BehavioralPattern, TrustProfile, NEUTRAL_TRUST};

/// Factor weights applied when combining score components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub behavioral: f64,
    pub violation: f64,
    pub positive: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            behavioral: 0.3,
            violation: 0.4,
            positive: 0.2,
        }
    }
}

impl ScoreWeights {
    /// Multiply every weight by `factor`, then clamp into `[min, max]`
    pub fn scaled(&self, factor: f64, min: f64, max: f64) -> Self {
        Self {
            behavioral: (self.behavioral * factor).clamp(min, max),
            violation: (self.violation * factor).clamp(min, max),
            positive: (self.positive * factor).clamp(min, max),
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.behavioral, self.violation, self.positive]
    }
}

/// Tunable constants of the calculator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorConfig {
    /// Daily multiplier for scores above neutral
    pub decay_rate: f64,
    /// Daily multiplier for scores below neutral
    pub recovery_rate: f64,
    /// Bonus per lifetime positive interaction
    pub positive_interaction_bonus: f64,
    /// Bonus per step of the improvement streak
    pub streak_bonus: f64,
    /// Cap on the streak bonus
    pub streak_bonus_cap: f64,
    /// Bonus per positive interaction inside the recent window
    pub recent_positive_bonus: f64,
    /// Length of the recent window in seconds
    pub recent_window_secs: i64,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.99,
            recovery_rate: 1.01,
            positive_interaction_bonus: 0.5,
            streak_bonus: 1.5,
            streak_bonus_cap: 20.0,
            recent_positive_bonus: 2.0,
            recent_window_secs: 3600,
        }
    }
}

/// Intermediate values of one calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub previous_score: f64,
    pub behavioral_score: f64,
    pub violation_impact: f64,
    pub positive_bonus: f64,
    /// Score before the time factor
    pub combined_score: f64,
    pub elapsed_days: f64,
    pub new_score: f64,
}

/// Trust score calculator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustCalculator {
    pub config: CalculatorConfig,
}

impl TrustCalculator {
    pub fn new(config: CalculatorConfig) -> Self {
        Self { config }
    }

    /// Recalculate a profile's score.
    ///
    /// `behavioral_score` is the tracker output for the interaction that
    /// triggered this call. The pattern must already contain that interaction.
    pub fn calculate(
        &self,
        profile: &mut TrustProfile,
        pattern: &BehavioralPattern,
        behavioral_score: f64,
        weights: &ScoreWeights,
        now: DateTime<Utc>,
    ) -> ScoreBreakdown {
        profile.record_behavior(behavioral_score);

        let previous_score = profile.trust_score;
        let violation_impact = profile.violation_impact(now);
        let positive_bonus = self.positive_bonus(profile, pattern, now);

        let combined_score = previous_score + behavioral_score * weights.behavioral
            - violation_impact * weights.violation
            + positive_bonus * weights.positive;

        let days = elapsed_days(profile.last_updated, now);
        let new_score = clamp_trust(self.apply_time_factor(combined_score, days));

        profile.trust_score = new_score;
        profile.last_updated = now;

        ScoreBreakdown {
            previous_score,
            behavioral_score,
            violation_impact,
            positive_bonus,
            combined_score,
            elapsed_days: days,
            new_score,
        }
    }

    /// Apply only the time factor, as for an idle profile
    pub fn refresh(&self, profile: &mut TrustProfile, now: DateTime<Utc>) -> ScoreBreakdown {
        let previous_score = profile.trust_score;
        let days = elapsed_days(profile.last_updated, now);
        let new_score = clamp_trust(self.apply_time_factor(previous_score, days));

        profile.trust_score = new_score;
        profile.last_updated = now;

        ScoreBreakdown {
            previous_score,
            behavioral_score: 0.0,
            violation_impact: 0.0,
            positive_bonus: 0.0,
            combined_score: previous_score,
            elapsed_days: days,
            new_score,
        }
    }

    /// `positive * 0.5 + min(streak * 1.5, 20) + recent_positive * 2`
    pub fn positive_bonus(
        &self,
        profile: &TrustProfile,
        pattern: &BehavioralPattern,
        now: DateTime<Utc>,
    ) -> f64 {
        let cfg = &self.config;
        let since = now - Duration::seconds(cfg.recent_window_secs);
        let recent_positive = pattern
            .behavioral_score
            .iter()
            .filter(|s| s.at >= since && s.value > 0.0)
            .count();

        profile.positive_interactions as f64 * cfg.positive_interaction_bonus
            + (profile.improvement_streak as f64 * cfg.streak_bonus).min(cfg.streak_bonus_cap)
            + recent_positive as f64 * cfg.recent_positive_bonus
    }

    /// Pull a score toward neutral based on elapsed days.
    ///
    /// Above neutral the score decays by `decay_rate^(days * 0.5)` and never
    /// drops below neutral. Below neutral it recovers by
    /// `recovery_rate^(1 - days)`, only upward and never past neutral.
    pub fn apply_time_factor(&self, score: f64, days: f64) -> f64 {
        let cfg = &self.config;
        if score > NEUTRAL_TRUST {
            (score * cfg.decay_rate.powf(days * 0.5)).max(NEUTRAL_TRUST)
        } else if score < NEUTRAL_TRUST {
            let factor = cfg.recovery_rate.powf(1.0 - days);
            if factor > 1.0 {
                (score * factor).min(NEUTRAL_TRUST)
            } else {
                score
            }
        } else {
            score
        }
    }
}
