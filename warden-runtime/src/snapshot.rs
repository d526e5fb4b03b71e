//! Audit snapshot of all trust state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use warden_core::{BehavioralPattern, ProfileKey, ScoreWeights, TrustPrediction, TrustProfile};

use crate::error::{EngineError, Result};

/// Pattern with the profile it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub key: ProfileKey,
    pub pattern: BehavioralPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub weights: ScoreWeights,
    pub profiles: Vec<TrustProfile>,
    pub patterns: Vec<PatternRecord>,
    pub predictions: Vec<TrustPrediction>,
}

/// What was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub profiles: usize,
    pub patterns: usize,
    pub predictions: usize,
    pub bytes: usize,
}

impl Snapshot {
    pub fn summary(&self, bytes: usize) -> SnapshotSummary {
        SnapshotSummary {
            profiles: self.profiles.len(),
            patterns: self.patterns.len(),
            predictions: self.predictions.len(),
            bytes,
        }
    }

    /// Write as pretty JSON, creating parent directories
    pub async fn write(&self, path: &Path) -> Result<SnapshotSummary> {
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| EngineError::Snapshot(format!("encode: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::Snapshot(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, &body)
            .await
            .map_err(|e| EngineError::Snapshot(format!("{}: {e}", path.display())))?;

        Ok(self.summary(body.len()))
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::Snapshot(format!("{}: {e}", path.display())))?;
        serde_json::from_slice(&body).map_err(|e| EngineError::Snapshot(format!("decode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.json");
        let now = Utc::now();
        let key = ProfileKey::new("u", "g");

        let snapshot = Snapshot {
            version: "test".into(),
            generated_at: now,
            weights: ScoreWeights::default(),
            profiles: vec![TrustProfile::new(key.clone(), now)],
            patterns: vec![PatternRecord {
                key,
                pattern: BehavioralPattern::new(),
            }],
            predictions: vec![],
        };

        let summary = snapshot.write(&path).await.unwrap();
        assert_eq!(summary.profiles, 1);
        assert_eq!(summary.patterns, 1);
        assert!(summary.bytes > 0);

        let loaded = Snapshot::read(&path).await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Snapshot::read(&dir.path().join("missing.json")).await.unwrap_err();
        assert!(matches!(err, EngineError::Snapshot(_)));
    }
}
