use rusqlite::Connection;

use crate::error::AppError;

/// Run the idempotent schema migration.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(SCHEMA)?;

    tracing::info!("Database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Element Fingerprints (one per test step)
-- ============================================================================

CREATE TABLE IF NOT EXISTS element_fingerprints (
    id                    TEXT PRIMARY KEY,
    step_id               TEXT NOT NULL,
    semantic_description  TEXT NOT NULL,
    center_x              REAL NOT NULL,
    center_y              REAL NOT NULL,
    rect_x                REAL NOT NULL,
    rect_y                REAL NOT NULL,
    rect_width            REAL NOT NULL,
    rect_height           REAL NOT NULL,
    created_at            INTEGER NOT NULL,
    updated_at            INTEGER NOT NULL,
    healing_count         INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_ef_step_id    ON element_fingerprints(step_id);
CREATE INDEX IF NOT EXISTS idx_ef_updated_at        ON element_fingerprints(updated_at);

-- ============================================================================
-- Healing History (append-only, size-bounded)
-- ============================================================================

CREATE TABLE IF NOT EXISTS healing_history (
    id                    TEXT PRIMARY KEY,
    step_id               TEXT NOT NULL,
    healing_id            TEXT NOT NULL,
    timestamp             INTEGER NOT NULL,
    original_description  TEXT NOT NULL,
    failure_reason        TEXT,
    result                TEXT NOT NULL,
    user_confirmed        INTEGER NOT NULL DEFAULT 0,
    fingerprint_updated   INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_hh_healing_id ON healing_history(healing_id);
CREATE INDEX IF NOT EXISTS idx_hh_step_id           ON healing_history(step_id);
CREATE INDEX IF NOT EXISTS idx_hh_timestamp         ON healing_history(timestamp);

-- ============================================================================
-- App Settings (key/value)
-- ============================================================================

CREATE TABLE IF NOT EXISTS app_settings (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

"#;
