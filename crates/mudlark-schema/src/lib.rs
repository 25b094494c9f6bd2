//! Schema model for the Mudlark entity system.
//!
//! This crate is pure data: it maps typed entity field declarations to
//! table schemas, renders DDL/DML text, and computes the delta between an
//! old schema and a new set of fields. It performs no I/O -- reading
//! stored schemas from disk and executing the generated SQL are the
//! responsibility of `mudlark-db`.
//!
//! # Modules
//!
//! - [`column`] -- column types, columns, and field declarations
//! - [`table`] -- table schema derivation and SQL rendering
//! - [`diff`] -- schema deltas and [`AlterRequest`] generation
//! - [`value`] -- typed column values for parameterized statements
//! - [`error`] -- shared error types
//!
//! # Determinism
//!
//! Column order within a derived schema is alphabetical, so generated
//! DDL and DML are reproducible and diffable across runs. The implicit
//! primary key `id` is never part of a [`TableSchema`]; it is rendered
//! first in every statement that needs it.

pub mod column;
pub mod diff;
pub mod error;
pub mod table;
pub mod value;

pub use column::{Column, ColumnType, FieldDef};
pub use diff::AlterRequest;
pub use error::SchemaError;
pub use table::{table_name_for, TableSchema};
pub use value::Value;
