//! Error types for the schema model.
//!
//! All fallible operations in this crate return [`SchemaError`]. These
//! errors are configuration mistakes: they indicate an entity kind was
//! declared incorrectly and are fatal at registration time, never
//! recovered from at runtime.

/// Errors that can occur while deriving a table schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The same field name was declared more than once for a kind.
    #[error("duplicate field {field} on table {table}")]
    DuplicateField {
        /// The table the field was declared for.
        table: String,
        /// The offending field name.
        field: String,
    },

    /// A field used the reserved primary-key name `id`.
    ///
    /// Every entity table carries an implicit `id integer PRIMARY KEY`;
    /// declaring it explicitly is a configuration error.
    #[error("field name 'id' is reserved on table {table}")]
    ReservedField {
        /// The table the field was declared for.
        table: String,
    },

    /// A field was declared with an empty name.
    #[error("empty field name on table {table}")]
    EmptyFieldName {
        /// The table the field was declared for.
        table: String,
    },
}
