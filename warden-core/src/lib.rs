//! # Warden Core
//!
//! Core primitives and algorithms for community trust scoring.
//!
//! Every member of a community carries a continuously updated trust score.
//! Interactions feed a behavioral score, violations subtract an exponentially
//! decaying penalty, and elapsed time pulls the score back toward neutral.
//!
//! ## Core Concepts
//!
//! - **TrustProfile**: Per (user, guild) score, risk level and violation history
//! - **BehavioralPattern**: Bounded time series of interaction signals
//! - **TrustCalculator**: Combines behavior, violations and positive bonus into a score
//! - **RiskAssessor**: Maps score and recent trend to a risk level with confidence
//! - **QuarantinePolicy**: Progressive quarantine decisions
//! - **TrendPredictor**: Extrapolates recent trajectories into a future score
//! - **WeightTuner**: Nudges calculator weights from realized prediction accuracy
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use warden_core::{
//!     BehaviorTracker, BehavioralPattern, InteractionSignals, ProfileKey, ScoreWeights,
//!     TrustCalculator, TrustProfile,
//! };
//!
//! let now = Utc::now();
//! let key = ProfileKey::new("user-1", "guild-1");
//! let mut profile = TrustProfile::new(key, now);
//! let mut pattern = BehavioralPattern::new();
//!
//! let signals = InteractionSignals::new(0.8).with_message_rate(2.0);
//! let behavioral = BehaviorTracker::default().record(&mut pattern, &signals, now);
//!
//! let calculator = TrustCalculator::default();
//! let breakdown =
//!     calculator.calculate(&mut profile, &pattern, behavioral, &ScoreWeights::default(), now);
//! assert!(breakdown.new_score <= warden_core::MAX_TRUST);
//! ```

pub mod analytics;
pub mod behavior;
pub mod error;
pub mod prediction;
pub mod profile;
pub mod quarantine;
pub mod risk;
pub mod trust;
pub mod tuning;

pub use analytics::{AnalyticsSummary, ScoreBucket};
pub use behavior::{BehaviorTracker, BehavioralPattern, InteractionSignals, Sample, SampleSeries};
pub use error::{Result, TrustError};
pub use prediction::{
    EstimatorKind, LeastSquares, PredictorConfig, TrendEstimator, TrendPredictor, TrustPrediction,
    TwoPointSlope,
};
pub use profile::{ProfileKey, RiskLevel, TrustProfile, Violation, ViolationType};
pub use quarantine::{QuarantineEvent, QuarantinePolicy};
pub use risk::{BehaviorTrend, RiskAssessment, RiskAssessor, RiskConfig};
pub use trust::{CalculatorConfig, ScoreBreakdown, ScoreWeights, TrustCalculator};
pub use tuning::{TunerConfig, TuningOutcome, TuningReport, WeightTuner};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum trust score
pub const MIN_TRUST: f64 = 0.0;

/// Maximum trust score
pub const MAX_TRUST: f64 = 150.0;

/// Trust score given to a user on first interaction
pub const DEFAULT_TRUST: f64 = 100.0;

/// Pivot the time factor pulls scores toward
pub const NEUTRAL_TRUST: f64 = 50.0;

/// Seconds in a day, the time constant of violation decay
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Clamp a score into `[MIN_TRUST, MAX_TRUST]`
pub fn clamp_trust(score: f64) -> f64 {
    if score.is_nan() {
        return NEUTRAL_TRUST;
    }
    score.clamp(MIN_TRUST, MAX_TRUST)
}

/// Elapsed time between two instants in fractional days, never negative
pub fn elapsed_days(from: chrono::DateTime<chrono::Utc>, to: chrono::DateTime<chrono::Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY).max(0.0)
}
