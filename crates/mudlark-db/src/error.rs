//! Error types for the database layer.
//!
//! Connection-level failures are wrapped in [`DbError`]; the migrator
//! and write queue define their own error enums in their modules
//! ([`MigrationError`](crate::migrate::MigrationError),
//! [`QueueError`](crate::queue::QueueError)).

/// Errors that can occur while connecting to or querying the database.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
