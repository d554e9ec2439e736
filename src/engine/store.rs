//! Async store interfaces for fingerprints and healing history.
//!
//! The engine only talks to these traits. The SQLite implementations run the
//! synchronous repo functions on the blocking pool.

use async_trait::async_trait;

use crate::config::retention_days_to_ms;
use crate::db::models::{HealingHistoryEntry, SemanticFingerprint};
use crate::db::repos::{fingerprints as fingerprint_repo, history as history_repo};
use crate::db::DbPool;
use crate::error::AppError;

// ── Traits ─────────────────────────────────────────────────────────

/// Keyed persistence of one semantic fingerprint per test step.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn get(&self, step_id: &str) -> Result<Option<SemanticFingerprint>, AppError>;

    /// Insert a new fingerprint. Fails if the step already has one.
    async fn save(&self, fingerprint: &SemanticFingerprint) -> Result<(), AppError>;

    /// Full replace by `id`. Returns false when no fingerprint has that id.
    async fn update(&self, fingerprint: &SemanticFingerprint) -> Result<bool, AppError>;

    async fn delete(&self, step_id: &str) -> Result<bool, AppError>;

    async fn get_all(&self) -> Result<Vec<SemanticFingerprint>, AppError>;

    async fn clear(&self) -> Result<usize, AppError>;

    /// Remove fingerprints whose `updated_at` is older than `now_ms - retention_days`.
    async fn cleanup_expired_at(&self, retention_days: u32, now_ms: i64)
        -> Result<usize, AppError>;

    async fn cleanup_expired(&self, retention_days: u32) -> Result<usize, AppError> {
        self.cleanup_expired_at(retention_days, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// Fingerprints ranked by `healing_count` descending (ties: most recently updated first).
    async fn get_most_healed(&self, limit: usize) -> Result<Vec<SemanticFingerprint>, AppError> {
        let mut all = self.get_all().await?;
        all.sort_by(|a, b| {
            b.healing_count
                .cmp(&a.healing_count)
                .then(b.updated_at.cmp(&a.updated_at))
        });
        all.truncate(limit);
        Ok(all)
    }
}

/// Append-only, size-bounded log of healing attempts.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append, evicting the oldest entries first when at capacity.
    async fn add(&self, entry: &HealingHistoryEntry) -> Result<(), AppError>;

    /// Newest first.
    async fn get_by_step_id(&self, step_id: &str) -> Result<Vec<HealingHistoryEntry>, AppError>;

    /// Newest first.
    async fn get_all(&self) -> Result<Vec<HealingHistoryEntry>, AppError>;

    async fn get_by_healing_id(
        &self,
        healing_id: &str,
    ) -> Result<Option<HealingHistoryEntry>, AppError>;

    /// Replace by `id`; used to record confirmation after the fact.
    async fn update(&self, entry: &HealingHistoryEntry) -> Result<bool, AppError>;

    async fn clear(&self) -> Result<usize, AppError>;
}

// ── SQLite implementations ─────────────────────────────────────────

async fn run_blocking<T, F>(pool: &DbPool, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&DbPool) -> Result<T, AppError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || f(&pool))
        .await
        .map_err(|e| AppError::Internal(format!("Storage task failed: {e}")))?
}

#[derive(Clone)]
pub struct SqliteFingerprintStore {
    pool: DbPool,
}

impl SqliteFingerprintStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FingerprintStore for SqliteFingerprintStore {
    async fn get(&self, step_id: &str) -> Result<Option<SemanticFingerprint>, AppError> {
        let step_id = step_id.to_string();
        run_blocking(&self.pool, move |pool| {
            fingerprint_repo::get_by_step_id(pool, &step_id)
        })
        .await
    }

    async fn save(&self, fingerprint: &SemanticFingerprint) -> Result<(), AppError> {
        let fp = fingerprint.clone();
        run_blocking(&self.pool, move |pool| fingerprint_repo::create(pool, &fp)).await
    }

    async fn update(&self, fingerprint: &SemanticFingerprint) -> Result<bool, AppError> {
        let fp = fingerprint.clone();
        run_blocking(&self.pool, move |pool| fingerprint_repo::update(pool, &fp)).await
    }

    async fn delete(&self, step_id: &str) -> Result<bool, AppError> {
        let step_id = step_id.to_string();
        run_blocking(&self.pool, move |pool| {
            fingerprint_repo::delete_by_step_id(pool, &step_id)
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<SemanticFingerprint>, AppError> {
        run_blocking(&self.pool, fingerprint_repo::get_all).await
    }

    async fn clear(&self) -> Result<usize, AppError> {
        run_blocking(&self.pool, fingerprint_repo::clear).await
    }

    async fn cleanup_expired_at(
        &self,
        retention_days: u32,
        now_ms: i64,
    ) -> Result<usize, AppError> {
        let cutoff = now_ms - retention_days_to_ms(retention_days);
        run_blocking(&self.pool, move |pool| {
            fingerprint_repo::delete_updated_before(pool, cutoff)
        })
        .await
    }

    async fn get_most_healed(&self, limit: usize) -> Result<Vec<SemanticFingerprint>, AppError> {
        run_blocking(&self.pool, move |pool| {
            fingerprint_repo::get_most_healed(pool, limit)
        })
        .await
    }
}

#[derive(Clone)]
pub struct SqliteHistoryStore {
    pool: DbPool,
    max_entries: usize,
}

impl SqliteHistoryStore {
    pub fn new(pool: DbPool, max_entries: usize) -> Self {
        Self { pool, max_entries }
    }

    pub async fn count(&self) -> Result<usize, AppError> {
        run_blocking(&self.pool, history_repo::count).await
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn add(&self, entry: &HealingHistoryEntry) -> Result<(), AppError> {
        let entry = entry.clone();
        let cap = self.max_entries;
        run_blocking(&self.pool, move |pool| history_repo::add(pool, &entry, cap))
            .await
            .map(|_| ())
    }

    async fn get_by_step_id(&self, step_id: &str) -> Result<Vec<HealingHistoryEntry>, AppError> {
        let step_id = step_id.to_string();
        run_blocking(&self.pool, move |pool| {
            history_repo::get_by_step_id(pool, &step_id)
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<HealingHistoryEntry>, AppError> {
        run_blocking(&self.pool, history_repo::get_all).await
    }

    async fn get_by_healing_id(
        &self,
        healing_id: &str,
    ) -> Result<Option<HealingHistoryEntry>, AppError> {
        let healing_id = healing_id.to_string();
        run_blocking(&self.pool, move |pool| {
            history_repo::get_by_healing_id(pool, &healing_id)
        })
        .await
    }

    async fn update(&self, entry: &HealingHistoryEntry) -> Result<bool, AppError> {
        let entry = entry.clone();
        run_blocking(&self.pool, move |pool| history_repo::update(pool, &entry)).await
    }

    async fn clear(&self) -> Result<usize, AppError> {
        run_blocking(&self.pool, history_repo::clear).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{HealingResult, HealingStrategy, Point, Rect};
    use crate::error::HealingFailure;

    const DAY_MS: i64 = 86_400_000;

    fn fp_updated_at(step_id: &str, updated_at: i64) -> SemanticFingerprint {
        let mut fp = SemanticFingerprint::new(
            step_id,
            "Search box".into(),
            Point::new(10.0, 10.0),
            Rect::new(0.0, 0.0, 20.0, 20.0),
        );
        fp.created_at = updated_at;
        fp.updated_at = updated_at;
        fp
    }

    #[tokio::test]
    async fn test_cleanup_expired_removes_exactly_stale() {
        let store = SqliteFingerprintStore::new(init_test_db().unwrap());
        let now = 100 * DAY_MS;

        store.save(&fp_updated_at("stale", now - 31 * DAY_MS)).await.unwrap();
        store.save(&fp_updated_at("edge", now - 30 * DAY_MS)).await.unwrap();
        store.save(&fp_updated_at("inside", now - 30 * DAY_MS + 1)).await.unwrap();
        store.save(&fp_updated_at("fresh", now)).await.unwrap();

        let removed = store.cleanup_expired_at(30, now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("stale").await.unwrap().is_none());
        for kept in ["edge", "inside", "fresh"] {
            assert!(store.get(kept).await.unwrap().is_some(), "{kept} should survive");
        }
    }

    #[tokio::test]
    async fn test_cleanup_expired_uses_wall_clock() {
        let store = SqliteFingerprintStore::new(init_test_db().unwrap());
        let now = chrono::Utc::now().timestamp_millis();
        store.save(&fp_updated_at("ancient", now - 400 * DAY_MS)).await.unwrap();
        store.save(&fp_updated_at("recent", now - DAY_MS)).await.unwrap();

        assert_eq!(store.cleanup_expired(30).await.unwrap(), 1);
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fingerprint_store_roundtrip() {
        let store = SqliteFingerprintStore::new(init_test_db().unwrap());
        let mut fp = fp_updated_at("S1", 5);
        store.save(&fp).await.unwrap();
        assert!(store.save(&fp_updated_at("S1", 6)).await.is_err());

        fp.healing_count = 4;
        assert!(store.update(&fp).await.unwrap());
        assert_eq!(store.get("S1").await.unwrap().unwrap().healing_count, 4);

        let top = store.get_most_healed(10).await.unwrap();
        assert_eq!(top.len(), 1);

        assert!(store.delete("S1").await.unwrap());
        assert_eq!(store.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_history_store_respects_cap() {
        let store = SqliteHistoryStore::new(init_test_db().unwrap(), 2);
        for ts in [1, 2, 3] {
            let mut entry = HealingHistoryEntry::new(
                "S1",
                "open menu",
                None,
                HealingResult::failed(HealingFailure::AllStrategiesFailed, HealingStrategy::Normal, 1, 0),
            );
            entry.timestamp = ts;
            store.add(&entry).await.unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 2);
        let stamps: Vec<i64> = store.get_all().await.unwrap().iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![3, 2]);
        assert_eq!(store.get_by_step_id("S1").await.unwrap().len(), 2);
        assert_eq!(store.clear().await.unwrap(), 2);
    }
}
