//! Self-healing element recovery for UI test automation.
//!
//! A passing step records a semantic fingerprint of the element it touched.
//! When a later run can no longer find that element, [`HealingEngine::heal`]
//! asks an injected [`ElementLocator`] to find it again from the description,
//! scores the candidate against the last known geometry, and leaves the
//! accept / confirm / reject decision to [`determine_action`].

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;

pub use config::HealingConfig;
pub use db::models::{
    ConfidenceFactors, HealingHistoryEntry, HealingResult, HealingStrategy, LocatedElement, Point,
    Rect, SemanticFingerprint, UnstableElement,
};
pub use db::{init_db, DbPool};
pub use engine::{
    determine_action, ConfidenceCalculator, DescribedElement, ElementLocator, FingerprintStore,
    HealingAction, HealingEngine, HealingOutcome, HealingStatistics, HistoryStore, LocateOptions,
    StatisticsAggregator,
};
pub use error::{AppError, HealingFailure, LocateFailure};
