//! Read-only aggregation over healing history and fingerprints.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::store::{FingerprintStore, HistoryStore};
use crate::db::models::{HealingHistoryEntry, HealingStrategy, UnstableElement};

/// How many fingerprints the unstable-element ranking reports.
pub const UNSTABLE_ELEMENT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyBreakdown {
    pub normal: usize,
    pub deep_think: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealingStatistics {
    pub total_attempts: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Percentage of attempts that succeeded, 0–100. Zero with no history.
    pub success_rate: f64,
    pub successes_by_strategy: StrategyBreakdown,
    /// Mean confidence over successful attempts only.
    pub average_confidence: f64,
    /// Mean `time_cost` in ms over successful attempts only.
    pub average_time_cost: f64,
    /// Most-healed steps, highest `healing_count` first.
    pub unstable_elements: Vec<UnstableElement>,
}

impl HealingStatistics {
    /// Build the history-derived part of the report. `unstable_elements` is
    /// left for the caller to fill.
    pub fn from_history(entries: &[HealingHistoryEntry]) -> Self {
        let mut stats = HealingStatistics {
            total_attempts: entries.len(),
            ..Default::default()
        };

        let mut confidence_sum = 0u64;
        let mut time_sum = 0u64;
        for entry in entries.iter().filter(|e| e.result.success) {
            stats.success_count += 1;
            confidence_sum += u64::from(entry.result.confidence);
            time_sum = time_sum.saturating_add(entry.result.time_cost);
            match entry.result.strategy {
                HealingStrategy::Normal => stats.successes_by_strategy.normal += 1,
                HealingStrategy::DeepThink => stats.successes_by_strategy.deep_think += 1,
            }
        }
        stats.failure_count = stats.total_attempts - stats.success_count;

        if stats.total_attempts > 0 {
            stats.success_rate = stats.success_count as f64 / stats.total_attempts as f64 * 100.0;
        }
        if stats.success_count > 0 {
            stats.average_confidence = confidence_sum as f64 / stats.success_count as f64;
            stats.average_time_cost = time_sum as f64 / stats.success_count as f64;
        }
        stats
    }
}

pub struct StatisticsAggregator {
    fingerprints: Arc<dyn FingerprintStore>,
    history: Arc<dyn HistoryStore>,
}

impl StatisticsAggregator {
    pub fn new(fingerprints: Arc<dyn FingerprintStore>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            fingerprints,
            history,
        }
    }

    /// Never fails; a store that cannot be read contributes nothing.
    pub async fn get_statistics(&self) -> HealingStatistics {
        let entries = self.history.get_all().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read healing history for statistics");
            Vec::new()
        });
        let mut stats = HealingStatistics::from_history(&entries);

        stats.unstable_elements = match self
            .fingerprints
            .get_most_healed(UNSTABLE_ELEMENT_LIMIT)
            .await
        {
            Ok(fps) => fps.iter().map(UnstableElement::from).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to rank unstable elements");
                Vec::new()
            }
        };
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{
        ConfidenceFactors, HealingResult, LocatedElement, Point, Rect, SemanticFingerprint,
    };
    use crate::engine::store::{SqliteFingerprintStore, SqliteHistoryStore};
    use crate::error::HealingFailure;

    fn success(strategy: HealingStrategy, confidence: u8, time_cost: u64) -> HealingHistoryEntry {
        let result = HealingResult {
            success: true,
            healing_id: uuid::Uuid::new_v4().to_string(),
            element: Some(LocatedElement {
                center: Point::new(1.0, 1.0),
                rect: Rect::new(0.0, 0.0, 2.0, 2.0),
            }),
            strategy,
            attempts_count: 1,
            confidence,
            confidence_factors: ConfidenceFactors::default(),
            time_cost,
            failure: None,
        };
        HealingHistoryEntry::new("S1", "click", None, result)
    }

    fn failure() -> HealingHistoryEntry {
        let result = HealingResult::failed(
            HealingFailure::AllStrategiesFailed,
            HealingStrategy::DeepThink,
            2,
            5_000,
        );
        HealingHistoryEntry::new("S1", "click", Some("gone".into()), result)
    }

    #[test]
    fn test_empty_history() {
        let stats = HealingStatistics::from_history(&[]);
        assert_eq!(stats, HealingStatistics::default());
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_averages_cover_successes_only() {
        let entries = vec![
            success(HealingStrategy::Normal, 90, 100),
            success(HealingStrategy::DeepThink, 50, 300),
            failure(),
            failure(),
        ];
        let stats = HealingStatistics::from_history(&entries);
        assert_eq!(stats.total_attempts, 4);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.successes_by_strategy, StrategyBreakdown { normal: 1, deep_think: 1 });
        assert_eq!(stats.average_confidence, 70.0);
        assert_eq!(stats.average_time_cost, 200.0);
    }

    #[tokio::test]
    async fn test_aggregator_ranks_unstable_elements() {
        let pool = init_test_db().unwrap();
        let fingerprints = Arc::new(SqliteFingerprintStore::new(pool.clone()));
        let history = Arc::new(SqliteHistoryStore::new(pool, 100));

        for i in 0..12u32 {
            let mut fp = SemanticFingerprint::new(
                &format!("step-{i}"),
                format!("element {i}"),
                Point::new(0.0, 0.0),
                Rect::new(0.0, 0.0, 1.0, 1.0),
            );
            fp.healing_count = i;
            fingerprints.save(&fp).await.unwrap();
        }
        history.add(&success(HealingStrategy::Normal, 80, 10)).await.unwrap();

        let stats = StatisticsAggregator::new(fingerprints, history).get_statistics().await;
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.success_rate, 100.0);
        assert_eq!(stats.unstable_elements.len(), UNSTABLE_ELEMENT_LIMIT);
        assert_eq!(stats.unstable_elements[0].step_id, "step-11");
        assert_eq!(stats.unstable_elements[0].healing_count, 11);
        let counts: Vec<u32> = stats.unstable_elements.iter().map(|u| u.healing_count).collect();
        assert!(counts.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(HealingStatistics::default()).unwrap();
        assert_eq!(json["successes_by_strategy"]["deepThink"], 0);
        assert!(json["unstable_elements"].as_array().unwrap().is_empty());
    }
}
