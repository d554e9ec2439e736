use serde::{Deserialize, Serialize};

use super::geometry::{Point, Rect};

// ============================================================================
// Semantic Fingerprints
// ============================================================================

/// Stored semantic description plus last known geometry for one test step.
///
/// At most one fingerprint exists per `step_id`; capture is an upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticFingerprint {
    pub id: String,
    pub step_id: String,
    pub semantic_description: String,
    pub last_known_center: Point,
    pub last_known_rect: Rect,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Milliseconds since the Unix epoch. Drives retention cleanup.
    pub updated_at: i64,
    /// Accepted healings only; never decreases.
    pub healing_count: u32,
}

impl SemanticFingerprint {
    /// A fresh fingerprint for a first capture.
    pub fn new(step_id: &str, semantic_description: String, center: Point, rect: Rect) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            step_id: step_id.to_string(),
            semantic_description,
            last_known_center: center,
            last_known_rect: rect,
            created_at: now,
            updated_at: now,
            healing_count: 0,
        }
    }
}

/// One row of the "unstable elements" report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnstableElement {
    pub step_id: String,
    pub semantic_description: String,
    pub healing_count: u32,
}

impl From<&SemanticFingerprint> for UnstableElement {
    fn from(fp: &SemanticFingerprint) -> Self {
        Self {
            step_id: fp.step_id.clone(),
            semantic_description: fp.semantic_description.clone(),
            healing_count: fp.healing_count,
        }
    }
}
