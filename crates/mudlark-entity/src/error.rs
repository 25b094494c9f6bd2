//! Error types for the entity runtime.

use mudlark_db::{DbError, MigrationError, QueueError};
use mudlark_schema::SchemaError;

/// Errors that can occur in the entity runtime.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// A kind was registered with an invalid field set.
    #[error("registration error: {0}")]
    Registration(#[from] SchemaError),

    /// The same kind was registered twice.
    #[error("kind {kind} registered twice")]
    DuplicateKind {
        /// The kind identifier.
        kind: &'static str,
    },

    /// An operation referenced a kind that was never registered.
    #[error("kind {kind} is not registered")]
    UnknownKind {
        /// The kind identifier.
        kind: &'static str,
    },

    /// Schema reconciliation failed at startup.
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    /// A pool-level database operation failed.
    #[error("database error: {0}")]
    Pool(#[from] DbError),

    /// A query failed.
    #[error("query error: {0}")]
    Query(#[from] sqlx::Error),

    /// The write queue rejected an operation.
    #[error("write queue error: {0}")]
    Queue(#[from] QueueError),

    /// A `get` referenced an id with no backing row.
    ///
    /// Ids only ever come from foreign-key fields or prior successful
    /// creation, so a missing row is an invalid reference, not a benign
    /// not-found.
    #[error("invalid reference: no {kind} with id {id}")]
    InvalidReference {
        /// The kind that was looked up.
        kind: &'static str,
        /// The id that had no row.
        id: i32,
    },

    /// A select filter referenced a field of a different kind.
    #[error("filter on {got} used in a select over {expected}")]
    ForeignFilter {
        /// The kind being selected.
        expected: &'static str,
        /// The kind the filter belongs to.
        got: &'static str,
    },

    /// A row value did not match the declared field type.
    #[error("cannot decode field {field} of {kind}: expected {expected}")]
    Decode {
        /// The kind being hydrated.
        kind: &'static str,
        /// The field that failed.
        field: String,
        /// The expected value type.
        expected: &'static str,
    },

    /// A record produced the wrong number of column values.
    #[error("{kind} produced {got} values for {expected} columns")]
    ValueCount {
        /// The kind.
        kind: &'static str,
        /// Number of columns in the schema.
        expected: usize,
        /// Number of values produced.
        got: usize,
    },
}
