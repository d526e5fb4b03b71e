//! Database schema
//!
//! Timestamps are stored through rusqlite's chrono mapping (UTC text), which
//! sorts lexically in time order.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_profiles (
    user_id               TEXT NOT NULL,
    guild_id              TEXT NOT NULL,
    trust_score           REAL NOT NULL,
    risk_level            TEXT NOT NULL,
    confidence            REAL NOT NULL,
    positive_interactions INTEGER NOT NULL DEFAULT 0,
    improvement_streak    INTEGER NOT NULL DEFAULT 0,
    created_at            TEXT NOT NULL,
    last_updated          TEXT NOT NULL,
    PRIMARY KEY (user_id, guild_id)
);

CREATE TABLE IF NOT EXISTS violations (
    id             TEXT PRIMARY KEY,
    user_id        TEXT NOT NULL,
    guild_id       TEXT NOT NULL,
    violation_type TEXT NOT NULL,
    severity       REAL NOT NULL CHECK (severity >= 0),
    evidence       TEXT,
    timestamp      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_violations_key_time ON violations (user_id, guild_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_violations_time ON violations (timestamp);

CREATE TABLE IF NOT EXISTS trust_predictions (
    user_id         TEXT NOT NULL,
    guild_id        TEXT NOT NULL,
    predicted_score REAL NOT NULL,
    confidence      REAL NOT NULL,
    horizon_secs    INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    due_at          TEXT NOT NULL,
    body            TEXT NOT NULL,
    PRIMARY KEY (user_id, guild_id)
);
CREATE INDEX IF NOT EXISTS idx_predictions_due ON trust_predictions (due_at);

CREATE TABLE IF NOT EXISTS behavioral_patterns (
    user_id    TEXT NOT NULL,
    guild_id   TEXT NOT NULL,
    signal     TEXT NOT NULL,
    samples    TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, guild_id, signal)
);

CREATE TABLE IF NOT EXISTS quarantine_events (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       TEXT NOT NULL,
    guild_id      TEXT NOT NULL,
    duration_secs INTEGER NOT NULL,
    reason        TEXT NOT NULL,
    issued_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_quarantine_key_time ON quarantine_events (user_id, guild_id, issued_at);

CREATE TABLE IF NOT EXISTS warden_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Create every table and index if missing
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT OR IGNORE INTO warden_meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Version recorded in the database, if any
pub fn version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM warden_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let raw: String = row.get(0)?;
            Ok(raw.parse().ok())
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();

        assert_eq!(version(&conn).unwrap(), Some(SCHEMA_VERSION));

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('user_profiles', 'violations', 'trust_predictions', 'behavioral_patterns', 'quarantine_events')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn test_negative_severity_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO violations (id, user_id, guild_id, violation_type, severity, timestamp) \
             VALUES ('x', 'u', 'g', 'spam', -1.0, '2024-01-01')",
            [],
        );
        assert!(result.is_err());
    }
}
