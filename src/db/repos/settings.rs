use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::DbPool;
use crate::error::AppError;

/// Settings key holding the serialized `HealingConfig`.
pub const HEALING_CONFIG_KEY: &str = "self_healing_config";

fn get_raw(pool: &DbPool, key: &str) -> Result<Option<String>, AppError> {
    let conn = pool.get()?;
    let result = conn.query_row(
        "SELECT value FROM app_settings WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(AppError::Database(e)),
    }
}

/// Load and decode a JSON-encoded setting. Returns None if the key is absent.
pub fn get_json<T: DeserializeOwned>(pool: &DbPool, key: &str) -> Result<Option<T>, AppError> {
    match get_raw(pool, key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode `value` as JSON and upsert it under `key`.
pub fn set_json<T: Serialize>(pool: &DbPool, key: &str, value: &T) -> Result<(), AppError> {
    let encoded = serde_json::to_string(value)?;
    let conn = pool.get()?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO app_settings (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
        params![key, encoded, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    #[test]
    fn test_json_setting_lifecycle() {
        let pool = init_test_db().unwrap();

        assert_eq!(get_json::<Vec<u32>>(&pool, "thresholds").unwrap(), None);

        set_json(&pool, "thresholds", &vec![85u32, 60]).unwrap();
        assert_eq!(get_json::<Vec<u32>>(&pool, "thresholds").unwrap(), Some(vec![85, 60]));

        // Overwrite
        set_json(&pool, "thresholds", &vec![90u32]).unwrap();
        assert_eq!(get_json::<Vec<u32>>(&pool, "thresholds").unwrap(), Some(vec![90]));

        // Keys are independent
        assert_eq!(get_json::<Vec<u32>>(&pool, "other").unwrap(), None);
    }

    #[test]
    fn test_undecodable_setting_is_serde_error() {
        let pool = init_test_db().unwrap();
        set_json(&pool, "k", &"not a number").unwrap();
        assert!(matches!(get_json::<u32>(&pool, "k"), Err(AppError::Serde(_))));
    }
}
