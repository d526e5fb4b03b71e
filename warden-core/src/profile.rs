//! Trust profiles and violation records
//!
//! A profile exists per (user, guild) pair. It is created lazily on the first
//! interaction and is never deleted, only decayed toward neutral.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{clamp_trust, TrustError, DEFAULT_TRUST, MAX_TRUST, MIN_TRUST, SECONDS_PER_DAY};

/// Identifies a profile: one user inside one community
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileKey {
    pub user_id: String,
    pub guild_id: String,
}

impl ProfileKey {
    pub fn new(user_id: impl Into<String>, guild_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            guild_id: guild_id.into(),
        }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.guild_id, self.user_id)
    }
}

/// Risk level attached to a profile
///
/// Levels are ordered from `Low` to `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    /// Map a trust score onto a level.
    ///
    /// Higher scores map to higher labels (>=95 critical, >=80 high, >=50 medium).
    pub fn from_score(score: f64) -> Self {
        if score >= 95.0 {
            RiskLevel::Critical
        } else if score >= 80.0 {
            RiskLevel::High
        } else if score >= 50.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Confidence an assessment starts from at this level
    pub fn baseline_confidence(&self) -> f64 {
        match self {
            RiskLevel::Critical => 0.9,
            RiskLevel::High => 0.8,
            RiskLevel::Medium => 0.7,
            RiskLevel::Low => 0.6,
        }
    }

    /// One level worse, saturating at `Critical`
    pub fn worse(self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium => RiskLevel::High,
            RiskLevel::High | RiskLevel::Critical => RiskLevel::Critical,
        }
    }

    /// One level better, saturating at `Low`
    pub fn better(self) -> Self {
        match self {
            RiskLevel::Critical => RiskLevel::High,
            RiskLevel::High => RiskLevel::Medium,
            RiskLevel::Medium | RiskLevel::Low => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(TrustError::InvalidSignal(format!("unknown risk level '{}'", other))),
        }
    }
}

/// Kinds of violation reported by the external classifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ViolationType {
    Spam,
    Toxicity,
    CapsAbuse,
    MentionSpam,
    RepeatedContent,
    /// Kept small so distress signals are not punished
    EmotionalDistress,
    Other(String),
}

impl ViolationType {
    /// Fixed per-type penalty before severity and decay
    pub fn base_impact(&self) -> f64 {
        match self {
            ViolationType::Spam => 15.0,
            ViolationType::Toxicity => 25.0,
            ViolationType::CapsAbuse => 5.0,
            ViolationType::MentionSpam => 10.0,
            ViolationType::RepeatedContent => 8.0,
            ViolationType::EmotionalDistress => 2.0,
            ViolationType::Other(_) => 10.0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ViolationType::Spam => "spam",
            ViolationType::Toxicity => "toxicity",
            ViolationType::CapsAbuse => "caps_abuse",
            ViolationType::MentionSpam => "mention_spam",
            ViolationType::RepeatedContent => "repeated_content",
            ViolationType::EmotionalDistress => "emotional_distress",
            ViolationType::Other(name) => name,
        }
    }
}

impl From<&str> for ViolationType {
    fn from(s: &str) -> Self {
        match s {
            "spam" => ViolationType::Spam,
            "toxicity" => ViolationType::Toxicity,
            "caps_abuse" => ViolationType::CapsAbuse,
            "mention_spam" => ViolationType::MentionSpam,
            "repeated_content" => ViolationType::RepeatedContent,
            "emotional_distress" => ViolationType::EmotionalDistress,
            other => ViolationType::Other(other.to_string()),
        }
    }
}

impl From<String> for ViolationType {
    fn from(s: String) -> Self {
        ViolationType::from(s.as_str())
    }
}

impl From<ViolationType> for String {
    fn from(v: ViolationType) -> Self {
        v.as_str().to_string()
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded violation. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: Uuid,
    pub violation_type: ViolationType,
    /// Severity multiplier (>= 0)
    pub severity: f64,
    pub timestamp: DateTime<Utc>,
    /// Free-form evidence supplied by the classifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl Violation {
    pub fn new(violation_type: ViolationType, severity: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            violation_type,
            severity: severity.max(0.0),
            timestamp,
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    /// Impact at `now`: `base_impact * severity * e^(-dt / 1 day)`
    pub fn decayed_impact(&self, now: DateTime<Utc>) -> f64 {
        let age_secs = ((now - self.timestamp).num_milliseconds() as f64 / 1000.0).max(0.0);
        self.violation_type.base_impact() * self.severity * (-age_secs / SECONDS_PER_DAY).exp()
    }
}

/// Trust state for one user in one community
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustProfile {
    pub key: ProfileKey,
    /// Always within `[MIN_TRUST, MAX_TRUST]`
    pub trust_score: f64,
    pub risk_level: RiskLevel,
    /// Confidence in `risk_level` (0.0 - 1.0)
    pub confidence: f64,
    pub positive_interactions: u64,
    /// Consecutive interactions with a positive behavioral score
    pub improvement_streak: u32,
    /// Oldest first
    pub violation_history: Vec<Violation>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl TrustProfile {
    /// Fresh profile at the default score
    pub fn new(key: ProfileKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            trust_score: DEFAULT_TRUST,
            risk_level: RiskLevel::from_score(DEFAULT_TRUST),
            confidence: RiskLevel::from_score(DEFAULT_TRUST).baseline_confidence(),
            positive_interactions: 0,
            improvement_streak: 0,
            violation_history: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Check the score invariant without modifying the profile
    pub fn validate(&self) -> crate::Result<()> {
        if self.trust_score.is_nan() || !(MIN_TRUST..=MAX_TRUST).contains(&self.trust_score) {
            return Err(TrustError::InvalidProfileState {
                score: self.trust_score,
            });
        }
        Ok(())
    }

    /// Clamp out-of-range state back into bounds.
    ///
    /// Returns the integrity error that was repaired, if any, so the caller can log it.
    pub fn sanitize(&mut self) -> Option<TrustError> {
        let problem = self.validate().err();
        if problem.is_some() {
            self.trust_score = clamp_trust(self.trust_score);
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        problem
    }

    /// Append a violation, keeping the history ordered by time
    pub fn push_violation(&mut self, violation: Violation) {
        let pos = self
            .violation_history
            .partition_point(|v| v.timestamp <= violation.timestamp);
        self.violation_history.insert(pos, violation);
    }

    /// Sum of decayed violation impacts at `now`
    pub fn violation_impact(&self, now: DateTime<Utc>) -> f64 {
        self.violation_history
            .iter()
            .map(|v| v.decayed_impact(now))
            .sum()
    }

    /// Track the sign of the latest behavioral score
    pub fn record_behavior(&mut self, behavioral_score: f64) {
        if behavioral_score > 0.0 {
            self.positive_interactions += 1;
            self.improvement_streak = self.improvement_streak.saturating_add(1);
        } else if behavioral_score < 0.0 {
            self.improvement_streak = 0;
        }
    }
}
