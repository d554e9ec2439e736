use serde::{Deserialize, Serialize};

use super::geometry::LocatedElement;
use crate::error::HealingFailure;

// ============================================================================
// Healing Results
// ============================================================================

/// Locate strategy used for a healing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealingStrategy {
    /// Direct semantic match.
    #[serde(rename = "normal")]
    Normal,
    /// Expanded, more exploratory search; only after `Normal` failed.
    #[serde(rename = "deepThink")]
    DeepThink,
}

impl HealingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealingStrategy::Normal => "normal",
            HealingStrategy::DeepThink => "deepThink",
        }
    }
}

impl std::fmt::Display for HealingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three 0–100 inputs to the confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub distance_score: u8,
    pub size_score: u8,
    pub strategy_score: u8,
}

/// Outcome of one `heal()` call. Not persisted on its own; embedded in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingResult {
    pub success: bool,
    pub healing_id: String,
    /// Present iff `success`.
    pub element: Option<LocatedElement>,
    pub strategy: HealingStrategy,
    pub attempts_count: u32,
    /// 0–100; 0 for failed results.
    pub confidence: u8,
    pub confidence_factors: ConfidenceFactors,
    /// Wall-clock milliseconds spent in `heal()`.
    pub time_cost: u64,
    /// Present iff `!success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<HealingFailure>,
}

impl HealingResult {
    pub fn failed(
        failure: HealingFailure,
        strategy: HealingStrategy,
        attempts_count: u32,
        time_cost: u64,
    ) -> Self {
        Self {
            success: false,
            healing_id: uuid::Uuid::new_v4().to_string(),
            element: None,
            strategy,
            attempts_count,
            confidence: 0,
            confidence_factors: ConfidenceFactors::default(),
            time_cost,
            failure: Some(failure),
        }
    }
}

// ============================================================================
// Healing History
// ============================================================================

/// Append-only audit record of a healing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingHistoryEntry {
    pub id: String,
    pub step_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// What the step was trying to do when it failed.
    pub original_description: String,
    pub failure_reason: Option<String>,
    pub result: HealingResult,
    pub user_confirmed: bool,
    pub fingerprint_updated: bool,
}

impl HealingHistoryEntry {
    pub fn new(
        step_id: &str,
        original_description: &str,
        failure_reason: Option<String>,
        result: HealingResult,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            step_id: step_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            original_description: original_description.to_string(),
            failure_reason,
            result,
            user_confirmed: false,
            fingerprint_updated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_wire_names() {
        assert_eq!(serde_json::to_string(&HealingStrategy::Normal).unwrap(), "\"normal\"");
        assert_eq!(
            serde_json::to_string(&HealingStrategy::DeepThink).unwrap(),
            "\"deepThink\""
        );
        assert_eq!(HealingStrategy::DeepThink.to_string(), "deepThink");
    }

    #[test]
    fn test_failed_result_shape() {
        let r = HealingResult::failed(HealingFailure::NoFingerprint, HealingStrategy::Normal, 0, 3);
        assert!(!r.success);
        assert!(r.element.is_none());
        assert_eq!(r.confidence, 0);
        assert_eq!(r.confidence_factors, ConfidenceFactors::default());
        assert_eq!(r.failure, Some(HealingFailure::NoFingerprint));
        assert!(!r.healing_id.is_empty());
    }
}
