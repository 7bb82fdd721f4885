//! Query gateway errors

use thiserror::Error;

/// Errors surfaced by the query gateway.
///
/// Storage failures are carried verbatim; only row-not-found and
/// foreign-key violations are lifted into their own variants so callers can
/// tell them apart regardless of backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        StoreError::NotFound { entity, id }
    }

    /// Classify a sqlx error for a lookup of `entity` by `id`.
    pub fn from_sqlx(e: sqlx::Error, entity: &'static str, id: i64) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound { entity, id },
            e => StoreError::from(e),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e
            && db_err.is_foreign_key_violation()
        {
            return StoreError::ForeignKeyViolation(db_err.message().to_string());
        }
        StoreError::Database(e)
    }
}
