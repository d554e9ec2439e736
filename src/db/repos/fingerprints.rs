use rusqlite::{params, Row};

use crate::db::models::{Point, Rect, SemanticFingerprint};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_fingerprint(row: &Row) -> rusqlite::Result<SemanticFingerprint> {
    Ok(SemanticFingerprint {
        id: row.get("id")?,
        step_id: row.get("step_id")?,
        semantic_description: row.get("semantic_description")?,
        last_known_center: Point::new(row.get("center_x")?, row.get("center_y")?),
        last_known_rect: Rect::new(
            row.get("rect_x")?,
            row.get("rect_y")?,
            row.get("rect_width")?,
            row.get("rect_height")?,
        ),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        healing_count: row.get::<_, Option<u32>>("healing_count")?.unwrap_or(0),
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn get_by_step_id(
    pool: &DbPool,
    step_id: &str,
) -> Result<Option<SemanticFingerprint>, AppError> {
    let conn = pool.get()?;
    let result = conn.query_row(
        "SELECT * FROM element_fingerprints WHERE step_id = ?1",
        params![step_id],
        row_to_fingerprint,
    );
    match result {
        Ok(fp) => Ok(Some(fp)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(AppError::Database(e)),
    }
}

/// Insert a new fingerprint. A second fingerprint for the same step is refused
/// by the unique index and reported as a validation error.
pub fn create(pool: &DbPool, fp: &SemanticFingerprint) -> Result<(), AppError> {
    if fp.step_id.trim().is_empty() {
        return Err(AppError::Validation("Step id cannot be empty".into()));
    }

    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO element_fingerprints
         (id, step_id, semantic_description, center_x, center_y,
          rect_x, rect_y, rect_width, rect_height, created_at, updated_at, healing_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            fp.id,
            fp.step_id,
            fp.semantic_description,
            fp.last_known_center.x,
            fp.last_known_center.y,
            fp.last_known_rect.x,
            fp.last_known_rect.y,
            fp.last_known_rect.width,
            fp.last_known_rect.height,
            fp.created_at,
            fp.updated_at,
            fp.healing_count,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Validation(format!("Fingerprint for step {} already exists", fp.step_id))
        } else {
            AppError::Database(e)
        }
    })?;
    Ok(())
}

/// Full replace by `id`. Returns false when no row matched.
pub fn update(pool: &DbPool, fp: &SemanticFingerprint) -> Result<bool, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE element_fingerprints SET
            step_id = ?2,
            semantic_description = ?3,
            center_x = ?4,
            center_y = ?5,
            rect_x = ?6,
            rect_y = ?7,
            rect_width = ?8,
            rect_height = ?9,
            created_at = ?10,
            updated_at = ?11,
            healing_count = ?12
         WHERE id = ?1",
        params![
            fp.id,
            fp.step_id,
            fp.semantic_description,
            fp.last_known_center.x,
            fp.last_known_center.y,
            fp.last_known_rect.x,
            fp.last_known_rect.y,
            fp.last_known_rect.width,
            fp.last_known_rect.height,
            fp.created_at,
            fp.updated_at,
            fp.healing_count,
        ],
    )?;
    Ok(rows > 0)
}

pub fn delete_by_step_id(pool: &DbPool, step_id: &str) -> Result<bool, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute(
        "DELETE FROM element_fingerprints WHERE step_id = ?1",
        params![step_id],
    )?;
    Ok(rows > 0)
}

pub fn get_all(pool: &DbPool) -> Result<Vec<SemanticFingerprint>, AppError> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT * FROM element_fingerprints ORDER BY updated_at DESC")?;
    let rows = stmt.query_map([], row_to_fingerprint)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Fingerprints that needed repair most often, for the unstable-elements report.
pub fn get_most_healed(
    pool: &DbPool,
    limit: usize,
) -> Result<Vec<SemanticFingerprint>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM element_fingerprints
         ORDER BY healing_count DESC, updated_at DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], row_to_fingerprint)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

pub fn clear(pool: &DbPool) -> Result<usize, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute("DELETE FROM element_fingerprints", [])?;
    Ok(rows)
}

/// Delete every fingerprint with `updated_at` strictly before `cutoff_ms`.
pub fn delete_updated_before(pool: &DbPool, cutoff_ms: i64) -> Result<usize, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute(
        "DELETE FROM element_fingerprints WHERE updated_at < ?1",
        params![cutoff_ms],
    )?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    fn sample(step_id: &str) -> SemanticFingerprint {
        SemanticFingerprint::new(
            step_id,
            "Blue 'Sign in' button in the header".into(),
            Point::new(100.0, 100.0),
            Rect::new(90.0, 90.0, 20.0, 20.0),
        )
    }

    #[test]
    fn test_fingerprint_crud() {
        let pool = init_test_db().unwrap();

        assert!(get_by_step_id(&pool, "S1").unwrap().is_none());

        let fp = sample("S1");
        create(&pool, &fp).unwrap();

        let fetched = get_by_step_id(&pool, "S1").unwrap().unwrap();
        assert_eq!(fetched, fp);

        let mut changed = fetched.clone();
        changed.semantic_description = "Sign in link".into();
        changed.last_known_center = Point::new(50.0, 60.0);
        changed.healing_count = 2;
        assert!(update(&pool, &changed).unwrap());
        let after = get_by_step_id(&pool, "S1").unwrap().unwrap();
        assert_eq!(after.id, fp.id);
        assert_eq!(after.semantic_description, "Sign in link");
        assert_eq!(after.last_known_center, Point::new(50.0, 60.0));
        assert_eq!(after.healing_count, 2);

        assert!(delete_by_step_id(&pool, "S1").unwrap());
        assert!(!delete_by_step_id(&pool, "S1").unwrap());
        assert!(get_by_step_id(&pool, "S1").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        let pool = init_test_db().unwrap();
        create(&pool, &sample("S1")).unwrap();

        let err = create(&pool, &sample("S1")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(get_all(&pool).unwrap().len(), 1);
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let pool = init_test_db().unwrap();
        assert!(!update(&pool, &sample("ghost")).unwrap());
        assert!(get_all(&pool).unwrap().is_empty());
    }

    #[test]
    fn test_delete_updated_before_boundary() {
        let pool = init_test_db().unwrap();

        let mut old = sample("old");
        old.updated_at = 1_000;
        let mut edge = sample("edge");
        edge.updated_at = 2_000;
        let mut fresh = sample("fresh");
        fresh.updated_at = 3_000;
        for fp in [&old, &edge, &fresh] {
            create(&pool, fp).unwrap();
        }

        // Strictly-before: the fingerprint sitting exactly on the cutoff survives
        assert_eq!(delete_updated_before(&pool, 2_000).unwrap(), 1);
        let remaining: Vec<String> = get_all(&pool).unwrap().into_iter().map(|f| f.step_id).collect();
        assert_eq!(remaining, vec!["fresh".to_string(), "edge".to_string()]);
    }

    #[test]
    fn test_most_healed_ordering_and_clear() {
        let pool = init_test_db().unwrap();
        for (step, count) in [("a", 1u32), ("b", 5), ("c", 3)] {
            let mut fp = sample(step);
            fp.healing_count = count;
            create(&pool, &fp).unwrap();
        }

        let top = get_most_healed(&pool, 2).unwrap();
        let steps: Vec<&str> = top.iter().map(|f| f.step_id.as_str()).collect();
        assert_eq!(steps, vec!["b", "c"]);

        assert_eq!(clear(&pool).unwrap(), 3);
        assert!(get_all(&pool).unwrap().is_empty());
    }
}
