use rusqlite::{params, Row};

use crate::db::models::{HealingHistoryEntry, HealingResult};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_entry(row: &Row) -> rusqlite::Result<HealingHistoryEntry> {
    let result_json: String = row.get("result")?;
    let result: HealingResult = serde_json::from_str(&result_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })?;

    Ok(HealingHistoryEntry {
        id: row.get("id")?,
        step_id: row.get("step_id")?,
        timestamp: row.get("timestamp")?,
        original_description: row.get("original_description")?,
        failure_reason: row.get("failure_reason")?,
        result,
        user_confirmed: row.get::<_, i32>("user_confirmed")? != 0,
        fingerprint_updated: row.get::<_, i32>("fingerprint_updated")? != 0,
    })
}

/// Append an entry, first evicting the oldest rows so the table never exceeds
/// `max_entries`. Eviction and insert share one transaction.
///
/// Returns the number of evicted entries.
pub fn add(
    pool: &DbPool,
    entry: &HealingHistoryEntry,
    max_entries: usize,
) -> Result<usize, AppError> {
    if max_entries == 0 {
        return Err(AppError::Validation("History cap must be at least 1".into()));
    }

    let result_json = serde_json::to_string(&entry.result)?;

    let mut conn = pool.get()?;
    let tx = conn.transaction().map_err(AppError::Database)?;

    let count: i64 = tx.query_row("SELECT COUNT(*) FROM healing_history", [], |row| row.get(0))?;
    let cap = max_entries as i64;
    let mut evicted = 0usize;
    if count >= cap {
        let overflow = count - cap + 1;
        evicted = tx.execute(
            "DELETE FROM healing_history WHERE id IN (
                SELECT id FROM healing_history
                ORDER BY timestamp ASC, rowid ASC
                LIMIT ?1
             )",
            params![overflow],
        )?;
    }

    tx.execute(
        "INSERT INTO healing_history
         (id, step_id, healing_id, timestamp, original_description, failure_reason,
          result, user_confirmed, fingerprint_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.id,
            entry.step_id,
            entry.result.healing_id,
            entry.timestamp,
            entry.original_description,
            entry.failure_reason,
            result_json,
            entry.user_confirmed as i32,
            entry.fingerprint_updated as i32,
        ],
    )?;

    tx.commit().map_err(AppError::Database)?;

    if evicted > 0 {
        tracing::debug!(evicted, cap = max_entries, "Evicted oldest healing history entries");
    }
    Ok(evicted)
}

pub fn get_by_step_id(
    pool: &DbPool,
    step_id: &str,
) -> Result<Vec<HealingHistoryEntry>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM healing_history WHERE step_id = ?1
         ORDER BY timestamp DESC, rowid DESC",
    )?;
    let rows = stmt.query_map(params![step_id], row_to_entry)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

pub fn get_all(pool: &DbPool) -> Result<Vec<HealingHistoryEntry>, AppError> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT * FROM healing_history ORDER BY timestamp DESC, rowid DESC")?;
    let rows = stmt.query_map([], row_to_entry)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

pub fn get_by_healing_id(
    pool: &DbPool,
    healing_id: &str,
) -> Result<Option<HealingHistoryEntry>, AppError> {
    let conn = pool.get()?;
    let result = conn.query_row(
        "SELECT * FROM healing_history WHERE healing_id = ?1",
        params![healing_id],
        row_to_entry,
    );
    match result {
        Ok(entry) => Ok(Some(entry)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(AppError::Database(e)),
    }
}

/// Replace an entry by `id`. Only the confirmation flags are expected to change.
pub fn update(pool: &DbPool, entry: &HealingHistoryEntry) -> Result<bool, AppError> {
    let result_json = serde_json::to_string(&entry.result)?;
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE healing_history SET
            step_id = ?2,
            healing_id = ?3,
            timestamp = ?4,
            original_description = ?5,
            failure_reason = ?6,
            result = ?7,
            user_confirmed = ?8,
            fingerprint_updated = ?9
         WHERE id = ?1",
        params![
            entry.id,
            entry.step_id,
            entry.result.healing_id,
            entry.timestamp,
            entry.original_description,
            entry.failure_reason,
            result_json,
            entry.user_confirmed as i32,
            entry.fingerprint_updated as i32,
        ],
    )?;
    Ok(rows > 0)
}

pub fn count(pool: &DbPool) -> Result<usize, AppError> {
    let conn = pool.get()?;
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM healing_history", [], |row| row.get(0))?;
    Ok(n as usize)
}

pub fn clear(pool: &DbPool) -> Result<usize, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute("DELETE FROM healing_history", [])?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{HealingStrategy, LocatedElement, Point, Rect};
    use crate::error::HealingFailure;

    fn entry_at(step_id: &str, timestamp: i64) -> HealingHistoryEntry {
        let result = HealingResult::failed(
            HealingFailure::AllStrategiesFailed,
            HealingStrategy::DeepThink,
            2,
            40,
        );
        let mut entry = HealingHistoryEntry::new(step_id, "click login", Some("not found".into()), result);
        entry.timestamp = timestamp;
        entry
    }

    #[test]
    fn test_history_add_and_query() {
        let pool = init_test_db().unwrap();

        add(&pool, &entry_at("S1", 100), 10).unwrap();
        add(&pool, &entry_at("S2", 200), 10).unwrap();
        add(&pool, &entry_at("S1", 300), 10).unwrap();

        let s1 = get_by_step_id(&pool, "S1").unwrap();
        assert_eq!(s1.len(), 2);
        assert_eq!(s1[0].timestamp, 300);
        assert_eq!(s1[1].timestamp, 100);

        let all = get_all(&pool).unwrap();
        let stamps: Vec<i64> = all.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);
        assert_eq!(count(&pool).unwrap(), 3);
    }

    #[test]
    fn test_result_roundtrips_through_json_column() {
        let pool = init_test_db().unwrap();
        let mut entry = entry_at("S1", 1);
        entry.result.success = true;
        entry.result.failure = None;
        entry.result.confidence = 77;
        entry.result.element = Some(LocatedElement {
            center: Point::new(1.5, 2.5),
            rect: Rect::new(0.0, 0.0, 3.0, 5.0),
        });
        add(&pool, &entry, 10).unwrap();

        let fetched = get_by_healing_id(&pool, &entry.result.healing_id).unwrap().unwrap();
        assert_eq!(fetched, entry);
        assert!(get_by_healing_id(&pool, "missing").unwrap().is_none());
    }

    #[test]
    fn test_eviction_removes_single_oldest_at_capacity() {
        let pool = init_test_db().unwrap();
        // Inserted out of timestamp order: eviction follows timestamp, not insertion
        for ts in [20, 10, 30] {
            add(&pool, &entry_at("S", ts), 3).unwrap();
        }
        assert_eq!(count(&pool).unwrap(), 3);

        let evicted = add(&pool, &entry_at("S", 40), 3).unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(count(&pool).unwrap(), 3);
        let stamps: Vec<i64> = get_all(&pool).unwrap().iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![40, 30, 20]);
    }

    #[test]
    fn test_eviction_shrinks_after_cap_lowered() {
        let pool = init_test_db().unwrap();
        for ts in 1..=5 {
            add(&pool, &entry_at("S", ts), 10).unwrap();
        }
        let evicted = add(&pool, &entry_at("S", 6), 2).unwrap();
        assert_eq!(evicted, 4);
        assert_eq!(count(&pool).unwrap(), 2);
    }

    #[test]
    fn test_zero_cap_rejected() {
        let pool = init_test_db().unwrap();
        assert!(matches!(
            add(&pool, &entry_at("S", 1), 0),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_update_flags_and_clear() {
        let pool = init_test_db().unwrap();
        let mut entry = entry_at("S1", 1);
        add(&pool, &entry, 10).unwrap();

        entry.user_confirmed = true;
        entry.fingerprint_updated = true;
        assert!(update(&pool, &entry).unwrap());

        let fetched = get_by_healing_id(&pool, &entry.result.healing_id).unwrap().unwrap();
        assert!(fetched.user_confirmed);
        assert!(fetched.fingerprint_updated);

        assert_eq!(clear(&pool).unwrap(), 1);
        assert!(get_all(&pool).unwrap().is_empty());
    }
}
