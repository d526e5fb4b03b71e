//! Configuration for the warden binary

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use warden_runtime::EngineConfig;

/// Everything the binary reads from `--config`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Engine, storage and schedule settings
    #[serde(flatten)]
    pub engine: EngineConfig,

    /// Default destination of `warden export`
    pub export_path: PathBuf,

    /// Output format of the reporting commands
    pub output: OutputFormat,
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// Pretty JSON output
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => anyhow::bail!("unknown output format '{}' (expected text or json)", other),
        }
    }
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            export_path: PathBuf::from("warden-snapshot.json"),
            output: OutputFormat::Text,
        }
    }
}

impl WardenConfig {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `path` if given, else use defaults
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Override the database file
    pub fn with_db(mut self, db: impl Into<PathBuf>) -> Self {
        self.engine.store.path = db.into();
        self
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = WardenConfig::parse(
            r#"
            export_path = "out/audit.json"

            [store]
            path = "/var/lib/warden/trust.db"
            retention_days = 30

            [store.pool]
            max_connections = 4

            [quarantine]
            base_duration_secs = 300

            [schedule]
            prediction_secs = 1800
            "#,
        )
        .unwrap();

        assert_eq!(config.export_path, PathBuf::from("out/audit.json"));
        assert_eq!(config.engine.store.path, PathBuf::from("/var/lib/warden/trust.db"));
        assert_eq!(config.engine.store.retention_days, 30);
        assert_eq!(config.engine.store.pool.max_connections, 4);
        assert_eq!(config.engine.store.pool.acquire_timeout_ms, 250);
        assert_eq!(config.engine.quarantine.base_duration_secs, 300);
        assert_eq!(config.engine.quarantine.max_duration_secs, 86_400);
        assert_eq!(config.engine.schedule.prediction_secs, 1800);
        assert_eq!(config.engine.schedule.weight_tuning_secs, 3600);
        assert_eq!(config.output, OutputFormat::Text);
    }

    #[test]
    fn test_db_flag_overrides_file() {
        let config = WardenConfig::parse("[store]\npath = \"from-file.db\"\n")
            .unwrap()
            .with_db("from-flag.db");
        assert_eq!(config.engine.store.path, PathBuf::from("from-flag.db"));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "output = \"json\"\n[weights]\nviolation = 0.45\n").unwrap();

        let config = WardenConfig::resolve(Some(&path)).unwrap();
        assert_eq!(config.output, OutputFormat::Json);
        assert_eq!(config.engine.weights.violation, 0.45);
        assert_eq!(config.engine.weights.behavioral, 0.3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = WardenConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("sarif".parse::<OutputFormat>().is_err());
    }
}
