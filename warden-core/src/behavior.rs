//! Behavioral pattern tracking
//!
//! Each user carries a fixed set of bounded time series, one per known signal,
//! plus an extension map for signals added later. The tracker turns a single
//! interaction into a transient behavioral score.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::TrustError;

/// Default number of samples retained per signal
pub const DEFAULT_SERIES_CAPACITY: usize = 100;

/// Signals observed for one processed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionSignals {
    /// Messages per minute. Derived from history when absent.
    #[serde(default)]
    pub message_rate: Option<f64>,
    /// Content quality from the classifier (0.0 - 1.0)
    pub content_quality: f64,
    #[serde(default)]
    pub mentions_received: u32,
    /// Seconds between this message and the one it replies to
    #[serde(default)]
    pub response_latency_secs: Option<f64>,
}

impl InteractionSignals {
    pub fn new(content_quality: f64) -> Self {
        Self {
            message_rate: None,
            content_quality,
            mentions_received: 0,
            response_latency_secs: None,
        }
    }

    pub fn with_message_rate(mut self, per_minute: f64) -> Self {
        self.message_rate = Some(per_minute);
        self
    }

    pub fn with_mentions(mut self, mentions: u32) -> Self {
        self.mentions_received = mentions;
        self
    }

    pub fn with_response_latency(mut self, secs: f64) -> Self {
        self.response_latency_secs = Some(secs);
        self
    }

    /// Reject values the classifier should never produce
    pub fn validate(&self) -> crate::Result<()> {
        if !self.content_quality.is_finite() {
            return Err(TrustError::InvalidSignal(format!(
                "content quality {} is not finite",
                self.content_quality
            )));
        }
        if let Some(rate) = self.message_rate {
            if !rate.is_finite() || rate < 0.0 {
                return Err(TrustError::InvalidSignal(format!("message rate {}", rate)));
            }
        }
        if let Some(latency) = self.response_latency_secs {
            if !latency.is_finite() || latency < 0.0 {
                return Err(TrustError::InvalidSignal(format!("response latency {}", latency)));
            }
        }
        Ok(())
    }
}

/// A timestamped value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// Append-only series that keeps the newest `capacity` samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSeries {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl Default for SampleSeries {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SERIES_CAPACITY)
    }
}

impl SampleSeries {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, at: DateTime<Utc>, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { at, value });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Values of the newest `n` samples, oldest first
    pub fn recent_values(&self, n: usize) -> Vec<f64> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).map(|s| s.value).collect()
    }

    /// Number of samples at or after `since`
    pub fn count_since(&self, since: DateTime<Utc>) -> usize {
        self.samples.iter().rev().take_while(|s| s.at >= since).count()
    }

    /// Drop samples older than `cutoff`, returning how many were removed
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.samples.len();
        while self.samples.front().is_some_and(|s| s.at < cutoff) {
            self.samples.pop_front();
        }
        before - self.samples.len()
    }
}

/// Per-user set of signal series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehavioralPattern {
    /// Observed message rate, one sample per interaction
    pub message_cadence: SampleSeries,
    pub content_quality: SampleSeries,
    pub mentions_received: SampleSeries,
    pub response_latency: SampleSeries,
    /// Output of the tracker, kept for trend analysis
    pub behavioral_score: SampleSeries,
    /// Score after each recalculation
    pub trust_score: SampleSeries,
    /// Issued quarantines; value is the duration in seconds
    pub quarantines: SampleSeries,
    /// Signals outside the fixed set
    #[serde(default)]
    pub extra: BTreeMap<String, SampleSeries>,
}

impl BehavioralPattern {
    pub const MESSAGE_CADENCE: &'static str = "message_cadence";
    pub const CONTENT_QUALITY: &'static str = "content_quality";
    pub const MENTIONS_RECEIVED: &'static str = "mentions_received";
    pub const RESPONSE_LATENCY: &'static str = "response_latency";
    pub const BEHAVIORAL_SCORE: &'static str = "behavioral_score";
    pub const TRUST_SCORE: &'static str = "trust_score";
    pub const QUARANTINES: &'static str = "quarantines";

    pub fn new() -> Self {
        Self::default()
    }

    /// All series with their signal names
    pub fn named_series(&self) -> Vec<(&str, &SampleSeries)> {
        let mut out: Vec<(&str, &SampleSeries)> = vec![
            (Self::MESSAGE_CADENCE, &self.message_cadence),
            (Self::CONTENT_QUALITY, &self.content_quality),
            (Self::MENTIONS_RECEIVED, &self.mentions_received),
            (Self::RESPONSE_LATENCY, &self.response_latency),
            (Self::BEHAVIORAL_SCORE, &self.behavioral_score),
            (Self::TRUST_SCORE, &self.trust_score),
            (Self::QUARANTINES, &self.quarantines),
        ];
        out.extend(self.extra.iter().map(|(name, series)| (name.as_str(), series)));
        out
    }

    pub fn series(&self, name: &str) -> Option<&SampleSeries> {
        match name {
            Self::MESSAGE_CADENCE => Some(&self.message_cadence),
            Self::CONTENT_QUALITY => Some(&self.content_quality),
            Self::MENTIONS_RECEIVED => Some(&self.mentions_received),
            Self::RESPONSE_LATENCY => Some(&self.response_latency),
            Self::BEHAVIORAL_SCORE => Some(&self.behavioral_score),
            Self::TRUST_SCORE => Some(&self.trust_score),
            Self::QUARANTINES => Some(&self.quarantines),
            other => self.extra.get(other),
        }
    }

    /// Mutable access, creating an extension series for unknown names
    pub fn series_mut(&mut self, name: &str) -> &mut SampleSeries {
        match name {
            Self::MESSAGE_CADENCE => &mut self.message_cadence,
            Self::CONTENT_QUALITY => &mut self.content_quality,
            Self::MENTIONS_RECEIVED => &mut self.mentions_received,
            Self::RESPONSE_LATENCY => &mut self.response_latency,
            Self::BEHAVIORAL_SCORE => &mut self.behavioral_score,
            Self::TRUST_SCORE => &mut self.trust_score,
            Self::QUARANTINES => &mut self.quarantines,
            other => self.extra.entry(other.to_string()).or_default(),
        }
    }

    /// Timestamp of the newest sample in any series
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.named_series()
            .into_iter()
            .filter_map(|(_, s)| s.last().map(|sample| sample.at))
            .max()
    }

    /// Number of quarantines issued at or after `since`
    pub fn quarantines_since(&self, since: DateTime<Utc>) -> usize {
        self.quarantines.count_since(since)
    }

    /// Total samples across every series
    pub fn sample_count(&self) -> usize {
        self.named_series().iter().map(|(_, s)| s.len()).sum()
    }

    /// Drop samples older than `cutoff` from every series
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for series in [
            &mut self.message_cadence,
            &mut self.content_quality,
            &mut self.mentions_received,
            &mut self.response_latency,
            &mut self.behavioral_score,
            &mut self.trust_score,
            &mut self.quarantines,
        ] {
            removed += series.prune_before(cutoff);
        }
        for series in self.extra.values_mut() {
            removed += series.prune_before(cutoff);
        }
        removed
    }
}

/// Turns interaction signals into behavioral scores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorTracker {
    /// Samples kept per signal
    pub series_capacity: usize,
    /// Window for deriving message rate when the caller gives none
    pub cadence_window_secs: i64,
}

impl Default for BehaviorTracker {
    fn default() -> Self {
        Self {
            series_capacity: DEFAULT_SERIES_CAPACITY,
            cadence_window_secs: 60,
        }
    }
}

impl BehaviorTracker {
    /// Empty pattern sized for this tracker
    pub fn new_pattern(&self) -> BehavioralPattern {
        let series = || SampleSeries::with_capacity(self.series_capacity);
        BehavioralPattern {
            message_cadence: series(),
            content_quality: series(),
            mentions_received: series(),
            response_latency: series(),
            behavioral_score: series(),
            trust_score: series(),
            quarantines: series(),
            extra: BTreeMap::new(),
        }
    }

    /// Record one interaction and return its behavioral score.
    ///
    /// The score is also appended to the pattern's `behavioral_score` series.
    pub fn record(
        &self,
        pattern: &mut BehavioralPattern,
        signals: &InteractionSignals,
        now: DateTime<Utc>,
    ) -> f64 {
        let rate = signals
            .message_rate
            .unwrap_or_else(|| self.derived_rate(pattern, now));

        pattern.message_cadence.push(now, rate);
        pattern
            .content_quality
            .push(now, signals.content_quality.clamp(0.0, 1.0));
        pattern
            .mentions_received
            .push(now, signals.mentions_received as f64);
        if let Some(latency) = signals.response_latency_secs {
            pattern.response_latency.push(now, latency);
        }

        let score = Self::behavioral_score(rate, signals);
        pattern.behavioral_score.push(now, score);
        score
    }

    /// Append a recalculated trust score to the history
    pub fn record_trust_score(&self, pattern: &mut BehavioralPattern, score: f64, now: DateTime<Utc>) {
        pattern.trust_score.push(now, score);
    }

    /// Append an issued quarantine to the history
    pub fn record_quarantine(
        &self,
        pattern: &mut BehavioralPattern,
        duration: Duration,
        now: DateTime<Utc>,
    ) {
        pattern.quarantines.push(now, duration.num_seconds() as f64);
    }

    /// Messages in the trailing window including the current one, per minute
    fn derived_rate(&self, pattern: &BehavioralPattern, now: DateTime<Utc>) -> f64 {
        let window = self.cadence_window_secs.max(1);
        let since = now - Duration::seconds(window);
        let count = pattern.message_cadence.count_since(since) + 1;
        count as f64 * 60.0 / window as f64
    }

    /// Sum of the cadence, content, social and latency sub-scores
    pub fn behavioral_score(rate_per_minute: f64, signals: &InteractionSignals) -> f64 {
        let cadence = if (1.0..=5.0).contains(&rate_per_minute) {
            10.0
        } else if rate_per_minute > 10.0 {
            -20.0
        } else if rate_per_minute < 0.1 {
            -5.0
        } else {
            0.0
        };

        let content = signals.content_quality.clamp(0.0, 1.0) * 5.0;

        let social = (signals.mentions_received as f64 * 2.0).min(10.0);

        let latency = match signals.response_latency_secs {
            Some(l) if (1.0..=30.0).contains(&l) => 5.0,
            Some(l) if l > 300.0 => -3.0,
            _ => 0.0,
        };

        cadence + content + social + latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_is_bounded() {
        let mut series = SampleSeries::with_capacity(3);
        let now = Utc::now();
        for i in 0..5 {
            series.push(now + Duration::seconds(i), i as f64);
        }

        assert_eq!(series.len(), 3);
        assert_eq!(series.recent_values(10), vec![2.0, 3.0, 4.0]);
        assert_eq!(series.recent_values(2), vec![3.0, 4.0]);
    }

    #[test]
    fn test_prune_before() {
        let mut series = SampleSeries::default();
        let now = Utc::now();
        series.push(now - Duration::days(40), 1.0);
        series.push(now - Duration::days(10), 2.0);
        series.push(now, 3.0);

        assert_eq!(series.prune_before(now - Duration::days(30)), 1);
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_cadence_sub_scores() {
        let base = InteractionSignals::new(0.0);
        assert_eq!(BehaviorTracker::behavioral_score(3.0, &base), 10.0);
        assert_eq!(BehaviorTracker::behavioral_score(12.0, &base), -20.0);
        assert_eq!(BehaviorTracker::behavioral_score(0.05, &base), -5.0);
        assert_eq!(BehaviorTracker::behavioral_score(7.0, &base), 0.0);
    }

    #[test]
    fn test_other_sub_scores() {
        let quality = InteractionSignals::new(0.8);
        assert!((BehaviorTracker::behavioral_score(7.0, &quality) - 4.0).abs() < 1e-12);

        let mentions = InteractionSignals::new(0.0).with_mentions(9);
        assert_eq!(BehaviorTracker::behavioral_score(7.0, &mentions), 10.0);

        let quick = InteractionSignals::new(0.0).with_response_latency(12.0);
        assert_eq!(BehaviorTracker::behavioral_score(7.0, &quick), 5.0);

        let slow = InteractionSignals::new(0.0).with_response_latency(900.0);
        assert_eq!(BehaviorTracker::behavioral_score(7.0, &slow), -3.0);
    }

    #[test]
    fn test_record_appends_samples() {
        let tracker = BehaviorTracker::default();
        let mut pattern = tracker.new_pattern();
        let now = Utc::now();

        let signals = InteractionSignals::new(1.0)
            .with_message_rate(2.0)
            .with_mentions(1)
            .with_response_latency(5.0);
        let score = tracker.record(&mut pattern, &signals, now);

        // 10 cadence + 5 content + 2 social + 5 latency
        assert_eq!(score, 22.0);
        assert_eq!(pattern.behavioral_score.len(), 1);
        assert_eq!(pattern.message_cadence.len(), 1);
        assert_eq!(pattern.response_latency.len(), 1);
        assert_eq!(pattern.last_activity(), Some(now));
    }

    #[test]
    fn test_derived_rate_from_history() {
        let tracker = BehaviorTracker::default();
        let mut pattern = tracker.new_pattern();
        let now = Utc::now();

        // Twelve messages inside one minute push the derived rate over 10/min
        let mut last = 0.0;
        for i in 0..12 {
            last = tracker.record(
                &mut pattern,
                &InteractionSignals::new(0.0),
                now + Duration::seconds(i * 2),
            );
        }
        assert_eq!(last, -20.0);
        assert_eq!(pattern.message_cadence.last().map(|s| s.value), Some(12.0));
    }

    #[test]
    fn test_extension_series() {
        let mut pattern = BehavioralPattern::new();
        pattern.series_mut("voice_minutes").push(Utc::now(), 4.0);

        assert_eq!(pattern.series("voice_minutes").map(|s| s.len()), Some(1));
        assert!(pattern
            .named_series()
            .iter()
            .any(|(name, _)| *name == "voice_minutes"));
    }

    #[test]
    fn test_invalid_signals_rejected() {
        assert!(InteractionSignals::new(f64::NAN).validate().is_err());
        assert!(InteractionSignals::new(0.5)
            .with_message_rate(-1.0)
            .validate()
            .is_err());
        assert!(InteractionSignals::new(0.5).validate().is_ok());
    }
}
