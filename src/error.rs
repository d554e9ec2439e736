use serde::{Deserialize, Serialize};

/// Crate-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Serializes as `{ error, kind }` so a host test executor gets structured messages.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Locator error: {0}")]
    Locator(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// True for the persistence family (database, pool, row encoding).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Pool(_) | AppError::Serde(_)
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Pool(_) => "pool",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Io(_) => "io",
            AppError::Serde(_) => "serde",
            AppError::Config(_) => "config",
            AppError::Locator(_) => "locator",
            AppError::Internal(_) => "internal",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind())?;
        s.end()
    }
}

/// Terminal reason a `heal()` call produced no usable element.
///
/// Carried inside a failed `HealingResult`; never returned as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum HealingFailure {
    #[error("self-healing is disabled")]
    Disabled,

    #[error("no fingerprint has been captured for this step")]
    NoFingerprint,

    #[error("all locate strategies failed")]
    AllStrategiesFailed,
}

/// Why a single locate attempt failed. Recovered by escalating strategy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocateFailure {
    #[error("no matching element")]
    NotFound,

    #[error("timed out after {0}ms")]
    TimedOut(u64),

    #[error("locator error: {0}")]
    Locator(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_serializes_kind() {
        let err = AppError::NotFound("HealingHistoryEntry abc".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["error"], "Not found: HealingHistoryEntry abc");
    }

    #[test]
    fn test_storage_family() {
        assert!(AppError::Database(rusqlite::Error::InvalidQuery).is_storage());
        assert!(!AppError::Validation("x".into()).is_storage());
        assert!(!AppError::Locator("x".into()).is_storage());
    }

    #[test]
    fn test_healing_failure_wire_names() {
        assert_eq!(
            serde_json::to_string(&HealingFailure::AllStrategiesFailed).unwrap(),
            "\"all_strategies_failed\""
        );
        assert_eq!(
            serde_json::to_string(&HealingFailure::NoFingerprint).unwrap(),
            "\"no_fingerprint\""
        );
    }
}
