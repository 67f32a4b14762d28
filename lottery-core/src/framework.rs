use sqlx::PgPool;
use thiserror::Error;

/// Executes persistence queries against the Postgres pool.
///
/// Every query is a plain struct with a `kanau::processor::Processor` impl
/// on this type, so callers stay generic over the store.
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

/// Errors surfaced by the persistence layer.
///
/// Unique-constraint violations are split out so the engine can turn them
/// into domain conflicts instead of generic failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        let constraint = error
            .as_database_error()
            .filter(|db_error| db_error.is_unique_violation())
            .map(|db_error| db_error.constraint().unwrap_or_default().to_string());
        match constraint {
            Some(constraint) => StoreError::UniqueViolation { constraint },
            None => StoreError::Database(error),
        }
    }
}
