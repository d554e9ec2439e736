//! Self-healing core: scoring, policy, the healing engine, and its store seams.

pub mod confidence;
pub mod decision;
pub mod healing;
pub mod locator;
pub mod statistics;
pub mod store;

pub use confidence::{ConfidenceCalculator, ConfidenceScore};
pub use decision::{determine_action, HealingAction};
pub use healing::{HealingEngine, HealingOutcome};
pub use locator::{DescribedElement, ElementLocator, LocateOptions};
pub use statistics::{HealingStatistics, StatisticsAggregator, StrategyBreakdown};
pub use store::{FingerprintStore, HistoryStore, SqliteFingerprintStore, SqliteHistoryStore};
