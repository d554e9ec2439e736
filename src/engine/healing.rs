//! Healing engine: fingerprint capture, multi-strategy recovery, confirmation.
//!
//! Every public operation degrades instead of failing: storage errors are
//! logged where they happen and turned into a no-op or a failed result, so a
//! broken database never takes the test run down with it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::confidence::ConfidenceCalculator;
use super::decision::{determine_action, HealingAction};
use super::locator::{DescribedElement, ElementLocator, LocateOptions};
use super::statistics::{HealingStatistics, StatisticsAggregator};
use super::store::{
    FingerprintStore, HistoryStore, SqliteFingerprintStore, SqliteHistoryStore,
};
use crate::config::HealingConfig;
use crate::db::models::{
    HealingHistoryEntry, HealingResult, HealingStrategy, LocatedElement, Point, Rect,
    SemanticFingerprint,
};
use crate::db::DbPool;
use crate::error::{AppError, HealingFailure, LocateFailure};

/// A healing result together with the policy decision taken on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingOutcome {
    pub result: HealingResult,
    pub action: HealingAction,
}

type LockMap = Mutex<HashMap<String, Arc<Mutex<()>>>>;

pub struct HealingEngine {
    fingerprints: Arc<dyn FingerprintStore>,
    history: Arc<dyn HistoryStore>,
    calculator: ConfidenceCalculator,
    locator: Arc<dyn ElementLocator>,
    config: RwLock<HealingConfig>,
    /// Per-step locks serializing fingerprint read-modify-write.
    step_locks: LockMap,
    /// Per-healing locks serializing confirm and auto-accept of one entry.
    /// Always taken before a step lock.
    healing_locks: LockMap,
}

impl HealingEngine {
    pub fn new(
        fingerprints: Arc<dyn FingerprintStore>,
        history: Arc<dyn HistoryStore>,
        calculator: ConfidenceCalculator,
        locator: Arc<dyn ElementLocator>,
        config: HealingConfig,
    ) -> Self {
        Self {
            fingerprints,
            history,
            calculator,
            locator,
            config: RwLock::new(config),
            step_locks: Mutex::new(HashMap::new()),
            healing_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Engine over the SQLite stores, with the calculator tuned from `config`.
    pub fn with_sqlite(
        pool: DbPool,
        locator: Arc<dyn ElementLocator>,
        config: HealingConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let fingerprints = Arc::new(SqliteFingerprintStore::new(pool.clone()));
        let history = Arc::new(SqliteHistoryStore::new(pool, config.max_history_entries));
        let calculator = ConfidenceCalculator::from_config(&config);
        Ok(Self::new(fingerprints, history, calculator, locator, config))
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> HealingConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the configuration. The injected calculator and the history
    /// store's cap are not affected.
    pub fn set_config(&self, config: HealingConfig) -> Result<(), AppError> {
        config.validate()?;
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        Ok(())
    }

    // =========================================================================
    // Capture
    // =========================================================================

    /// Record (or refresh) the fingerprint for a step that just succeeded.
    ///
    /// Returns the stored fingerprint, or `None` when healing is disabled or
    /// persistence failed.
    pub async fn collect_fingerprint(
        &self,
        step_id: &str,
        center: Point,
        rect: Rect,
    ) -> Option<SemanticFingerprint> {
        let config = self.config();
        if !config.enabled {
            return None;
        }

        // Describe outside the step lock; the locator may be slow.
        let described = self.describe_element(center).await;

        let lock = keyed_lock(&self.step_locks, step_id).await;
        let _guard = lock.lock().await;

        let existing = match self.fingerprints.get(step_id).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(step_id = %step_id, error = %e, "Fingerprint lookup failed, capture skipped");
                return None;
            }
        };

        match existing {
            Some(mut fp) => {
                // A positional placeholder never overwrites a real description.
                if !described.is_fallback() {
                    fp.semantic_description = described.into_text();
                }
                fp.last_known_center = center;
                fp.last_known_rect = rect;
                fp.updated_at = now_ms();

                match self.fingerprints.update(&fp).await {
                    Ok(true) => {
                        tracing::debug!(step_id = %step_id, fingerprint_id = %fp.id, "Fingerprint refreshed");
                        Some(fp)
                    }
                    Ok(false) => {
                        // Removed by cleanup since the read; capture it afresh
                        tracing::debug!(step_id = %step_id, "Fingerprint vanished during refresh, recreating");
                        self.insert_fingerprint(step_id, fp.semantic_description, center, rect)
                            .await
                    }
                    Err(e) => {
                        tracing::warn!(step_id = %step_id, error = %e, "Failed to update fingerprint");
                        None
                    }
                }
            }
            None => {
                self.insert_fingerprint(step_id, described.into_text(), center, rect)
                    .await
            }
        }
    }

    /// Caller holds the step lock.
    async fn insert_fingerprint(
        &self,
        step_id: &str,
        description: String,
        center: Point,
        rect: Rect,
    ) -> Option<SemanticFingerprint> {
        let fp = SemanticFingerprint::new(step_id, description, center, rect);
        match self.fingerprints.save(&fp).await {
            Ok(()) => {
                tracing::info!(step_id = %step_id, fingerprint_id = %fp.id, "Fingerprint captured");
                Some(fp)
            }
            Err(e) => {
                tracing::warn!(step_id = %step_id, error = %e, "Failed to save fingerprint");
                None
            }
        }
    }

    /// Ask the locator to describe the element at `center`, falling back to a
    /// positional description on error, timeout, or an empty answer.
    pub async fn describe_element(&self, center: Point) -> DescribedElement {
        let timeout = self.config().describe_timeout();
        match tokio::time::timeout(timeout, self.locator.describe(center)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                DescribedElement::Generated(text.trim().to_string())
            }
            Ok(Ok(_)) => {
                tracing::debug!("Locator returned an empty description, using fallback");
                DescribedElement::fallback_for(center)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Element description failed, using fallback");
                DescribedElement::fallback_for(center)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Element description timed out, using fallback"
                );
                DescribedElement::fallback_for(center)
            }
        }
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Try to relocate the element for `step_id`. Never fails; a failed
    /// recovery is a result with `success: false`.
    pub async fn heal(&self, step_id: &str, original_description: &str) -> HealingResult {
        let started = Instant::now();
        let config = self.config();

        if !config.enabled {
            tracing::debug!(step_id = %step_id, "Self-healing disabled");
            return HealingResult::failed(
                HealingFailure::Disabled,
                HealingStrategy::Normal,
                0,
                elapsed_ms(started),
            );
        }

        let fingerprint = match self.fingerprints.get(step_id).await {
            Ok(Some(fp)) => fp,
            Ok(None) => {
                tracing::info!(step_id = %step_id, "No fingerprint for step, cannot heal");
                return HealingResult::failed(
                    HealingFailure::NoFingerprint,
                    HealingStrategy::Normal,
                    0,
                    elapsed_ms(started),
                );
            }
            Err(e) => {
                if e.is_storage() {
                    tracing::error!(step_id = %step_id, error = %e, "Fingerprint storage unreadable, cannot heal");
                } else {
                    tracing::warn!(step_id = %step_id, error = %e, "Fingerprint lookup failed, cannot heal");
                }
                return HealingResult::failed(
                    HealingFailure::NoFingerprint,
                    HealingStrategy::Normal,
                    0,
                    elapsed_ms(started),
                );
            }
        };

        let mut strategies = vec![HealingStrategy::Normal];
        if config.enable_deep_think {
            strategies.push(HealingStrategy::DeepThink);
        }

        let mut attempts = 0u32;
        let mut failures: Vec<(HealingStrategy, LocateFailure)> = Vec::new();

        for strategy in strategies {
            attempts += 1;
            match self
                .try_locate(&fingerprint.semantic_description, strategy, &config)
                .await
            {
                Ok(element) => {
                    let score = self.calculator.calculate(
                        element.center,
                        element.rect,
                        &fingerprint,
                        strategy,
                    );
                    let result = HealingResult {
                        success: true,
                        healing_id: uuid::Uuid::new_v4().to_string(),
                        element: Some(element),
                        strategy,
                        attempts_count: attempts,
                        confidence: score.confidence,
                        confidence_factors: score.factors,
                        time_cost: elapsed_ms(started),
                        failure: None,
                    };
                    tracing::info!(
                        step_id = %step_id,
                        healing_id = %result.healing_id,
                        strategy = %strategy,
                        attempts = attempts,
                        confidence = result.confidence,
                        "Element healed"
                    );
                    self.record(step_id, original_description, summarize_failures(&failures), &result)
                        .await;
                    return result;
                }
                Err(failure) => {
                    tracing::warn!(
                        step_id = %step_id,
                        strategy = %strategy,
                        error = %failure,
                        "Locate attempt failed"
                    );
                    failures.push((strategy, failure));
                }
            }
        }

        let last_strategy = failures
            .last()
            .map(|(s, _)| *s)
            .unwrap_or(HealingStrategy::Normal);
        let result = HealingResult::failed(
            HealingFailure::AllStrategiesFailed,
            last_strategy,
            attempts,
            elapsed_ms(started),
        );
        let reason = match summarize_failures(&failures) {
            Some(detail) => format!("{} ({detail})", HealingFailure::AllStrategiesFailed),
            None => HealingFailure::AllStrategiesFailed.to_string(),
        };
        tracing::warn!(
            step_id = %step_id,
            healing_id = %result.healing_id,
            attempts = attempts,
            "Healing failed: {}",
            reason
        );
        self.record(step_id, original_description, Some(reason), &result)
            .await;
        result
    }

    /// `heal` followed by the decision policy. An auto-accepted result is
    /// applied to the fingerprint straight away.
    pub async fn heal_and_decide(&self, step_id: &str, original_description: &str) -> HealingOutcome {
        let result = self.heal(step_id, original_description).await;
        let action = self.determine_action(&result);

        if action == HealingAction::AutoAccept {
            if let Some(element) = result.element {
                self.auto_apply(step_id, &result.healing_id, element).await;
            }
        }

        HealingOutcome { result, action }
    }

    /// Apply an auto-accepted location and flag its history entry, unless a
    /// confirmation already handled it. A missing entry (history unwritable)
    /// still moves the fingerprint.
    async fn auto_apply(&self, step_id: &str, healing_id: &str, element: LocatedElement) {
        let lock = keyed_lock(&self.healing_locks, healing_id).await;
        let _guard = lock.lock().await;

        let entry = match self.history.get_by_healing_id(healing_id).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(healing_id = %healing_id, error = %e, "Failed to load healing entry");
                None
            }
        };
        if entry
            .as_ref()
            .is_some_and(|e| e.user_confirmed || e.fingerprint_updated)
        {
            tracing::debug!(healing_id = %healing_id, "Healing already handled, skipping auto-accept");
            return;
        }

        if !self.apply_healed_location(step_id, element, None).await {
            return;
        }

        if let Some(mut entry) = entry {
            entry.fingerprint_updated = true;
            if let Err(e) = self.history.update(&entry).await {
                tracing::warn!(healing_id = %healing_id, error = %e, "Failed to update healing entry");
            }
        }
    }

    /// Policy decision using the configured auto-accept threshold.
    pub fn determine_action(&self, result: &HealingResult) -> HealingAction {
        determine_action(result, self.config().auto_accept_threshold)
    }

    async fn try_locate(
        &self,
        description: &str,
        strategy: HealingStrategy,
        config: &HealingConfig,
    ) -> Result<LocatedElement, LocateFailure> {
        let (options, timeout) = match strategy {
            HealingStrategy::Normal => (LocateOptions { deep_think: false }, config.locate_timeout()),
            HealingStrategy::DeepThink => {
                (LocateOptions { deep_think: true }, config.deep_think_timeout())
            }
        };

        match tokio::time::timeout(timeout, self.locator.locate(description, options)).await {
            Ok(Ok(Some(element))) => Ok(element),
            Ok(Ok(None)) => Err(LocateFailure::NotFound),
            Ok(Err(e)) => Err(LocateFailure::Locator(e.to_string())),
            Err(_) => Err(LocateFailure::TimedOut(timeout.as_millis() as u64)),
        }
    }

    async fn record(
        &self,
        step_id: &str,
        original_description: &str,
        failure_reason: Option<String>,
        result: &HealingResult,
    ) {
        let entry = HealingHistoryEntry::new(
            step_id,
            original_description,
            failure_reason,
            result.clone(),
        );
        if let Err(e) = self.history.add(&entry).await {
            tracing::error!(
                step_id = %step_id,
                healing_id = %result.healing_id,
                error = %e,
                "Failed to append healing history"
            );
        }
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    /// Record a human decision on a healing attempt.
    ///
    /// Accepting a successful result moves the fingerprint to the healed
    /// location, bumps `healing_count`, and optionally replaces the
    /// description. Rejecting leaves the fingerprint untouched. Returns true
    /// when the confirmation was recorded; an unknown or already-confirmed
    /// healing id returns false.
    pub async fn confirm_healing(
        &self,
        healing_id: &str,
        accepted: bool,
        new_description: Option<&str>,
    ) -> bool {
        let lock = keyed_lock(&self.healing_locks, healing_id).await;
        let _guard = lock.lock().await;

        let mut entry = match self.history.get_by_healing_id(healing_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::warn!(healing_id = %healing_id, "Confirmation for unknown healing id");
                return false;
            }
            Err(e) => {
                tracing::warn!(healing_id = %healing_id, error = %e, "Failed to load healing entry");
                return false;
            }
        };

        if entry.user_confirmed {
            tracing::info!(healing_id = %healing_id, "Healing already confirmed, ignoring");
            return false;
        }

        // Auto-accepted entries were applied already; never apply twice.
        let applied = if entry.fingerprint_updated {
            true
        } else if accepted && entry.result.success {
            match entry.result.element {
                Some(element) => {
                    self.apply_healed_location(&entry.step_id, element, new_description)
                        .await
                }
                None => false,
            }
        } else {
            false
        };

        entry.user_confirmed = true;
        entry.fingerprint_updated = applied;

        match self.history.update(&entry).await {
            Ok(true) => {
                tracing::info!(
                    healing_id = %healing_id,
                    step_id = %entry.step_id,
                    accepted = accepted,
                    fingerprint_updated = applied,
                    "Healing confirmed"
                );
                true
            }
            Ok(false) => {
                tracing::warn!(healing_id = %healing_id, "Healing entry evicted before confirmation was stored");
                false
            }
            Err(e) => {
                tracing::warn!(healing_id = %healing_id, error = %e, "Failed to store confirmation");
                false
            }
        }
    }

    async fn apply_healed_location(
        &self,
        step_id: &str,
        element: LocatedElement,
        new_description: Option<&str>,
    ) -> bool {
        let lock = keyed_lock(&self.step_locks, step_id).await;
        let _guard = lock.lock().await;

        let mut fp = match self.fingerprints.get(step_id).await {
            Ok(Some(fp)) => fp,
            Ok(None) => {
                tracing::warn!(step_id = %step_id, "Fingerprint gone, healed location not applied");
                return false;
            }
            Err(e) => {
                tracing::warn!(step_id = %step_id, error = %e, "Failed to load fingerprint for update");
                return false;
            }
        };

        fp.last_known_center = element.center;
        fp.last_known_rect = element.rect;
        fp.healing_count = fp.healing_count.saturating_add(1);
        if let Some(desc) = new_description.map(str::trim).filter(|d| !d.is_empty()) {
            fp.semantic_description = desc.to_string();
        }
        fp.updated_at = now_ms();

        match self.fingerprints.update(&fp).await {
            Ok(true) => {
                tracing::debug!(
                    step_id = %step_id,
                    healing_count = fp.healing_count,
                    "Healed location applied to fingerprint"
                );
                true
            }
            Ok(false) => {
                tracing::warn!(step_id = %step_id, "Fingerprint vanished during update");
                false
            }
            Err(e) => {
                tracing::warn!(step_id = %step_id, error = %e, "Failed to update fingerprint");
                false
            }
        }
    }

    // =========================================================================
    // Maintenance & queries
    // =========================================================================

    /// Drop fingerprints outside the retention window. Returns the number removed.
    pub async fn cleanup(&self) -> usize {
        let days = self.config().fingerprint_retention_days;
        match self.fingerprints.cleanup_expired(days).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(removed, retention_days = days, "Expired fingerprints removed");
                }
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Fingerprint cleanup failed");
                0
            }
        }
    }

    pub async fn get_statistics(&self) -> HealingStatistics {
        StatisticsAggregator::new(self.fingerprints.clone(), self.history.clone())
            .get_statistics()
            .await
    }

    pub async fn get_fingerprint(&self, step_id: &str) -> Option<SemanticFingerprint> {
        self.fingerprints.get(step_id).await.unwrap_or_else(|e| {
            tracing::warn!(step_id = %step_id, error = %e, "Failed to load fingerprint");
            None
        })
    }

    pub async fn get_history(&self, step_id: &str) -> Vec<HealingHistoryEntry> {
        self.history.get_by_step_id(step_id).await.unwrap_or_else(|e| {
            tracing::warn!(step_id = %step_id, error = %e, "Failed to load healing history");
            Vec::new()
        })
    }

    pub async fn delete_fingerprint(&self, step_id: &str) -> bool {
        let lock = keyed_lock(&self.step_locks, step_id).await;
        let _guard = lock.lock().await;
        self.fingerprints.delete(step_id).await.unwrap_or_else(|e| {
            tracing::warn!(step_id = %step_id, error = %e, "Failed to delete fingerprint");
            false
        })
    }

    /// Wipe all fingerprints and history.
    pub async fn clear_all(&self) {
        if let Err(e) = self.fingerprints.clear().await {
            tracing::warn!(error = %e, "Failed to clear fingerprints");
        }
        if let Err(e) = self.history.clear().await {
            tracing::warn!(error = %e, "Failed to clear healing history");
        }
    }

}

async fn keyed_lock(locks: &LockMap, key: &str) -> Arc<Mutex<()>> {
    let mut locks = locks.lock().await;
    // Drop locks nobody is holding or waiting on
    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    locks
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

fn summarize_failures(failures: &[(HealingStrategy, LocateFailure)]) -> Option<String> {
    if failures.is_empty() {
        return None;
    }
    Some(
        failures
            .iter()
            .map(|(strategy, failure)| format!("{strategy}: {failure}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// =============================================================================
// Tests
// =============================================================================
