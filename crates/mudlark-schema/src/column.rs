//! Column types, columns, and entity field declarations.
//!
//! A [`FieldDef`] is what an entity kind declares; a [`Column`] is what
//! ends up in a [`TableSchema`](crate::TableSchema). The two are nearly
//! identical today, but the distinction keeps the declaration surface
//! (what `mudlark-entity` kinds describe) separate from the persisted
//! schema-of-record format, which is serialized to disk and compared for
//! drift.

use serde::{Deserialize, Serialize};

/// The database type of a column.
///
/// This is a closed set: every field of every entity kind must map to
/// one of these. Types outside the set cannot be declared at all, which
/// moves the original "unsupported type" failure mode to compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// `boolean`.
    Boolean,
    /// `integer`.
    Integer,
    /// `double precision`.
    Double,
    /// `text`.
    Text,
    /// A foreign key to another entity table, stored as `integer`.
    ///
    /// Carries the referenced table name so the post-create pass can
    /// generate the named constraint.
    Foreign(String),
}

impl ColumnType {
    /// The SQL type name this column is declared with.
    ///
    /// Foreign keys are plain integers at the column level; the
    /// referential constraint is added separately in the post-create
    /// pass (see [`TableSchema::post_create_sql`]).
    ///
    /// [`TableSchema::post_create_sql`]: crate::TableSchema::post_create_sql
    pub const fn sql_name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer | Self::Foreign(_) => "integer",
            Self::Double => "double precision",
            Self::Text => "text",
        }
    }

    /// The referenced table name, if this is a foreign-key column.
    pub fn foreign_target(&self) -> Option<&str> {
        match self {
            Self::Foreign(table) => Some(table),
            _ => None,
        }
    }
}

/// A single column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name (equals the declaring field name).
    pub name: String,
    /// Database type of the column.
    pub ty: ColumnType,
    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl Column {
    /// Render this column as it appears inside `CREATE TABLE`.
    pub fn render(&self) -> String {
        if self.nullable {
            format!("{} {}", self.name, self.ty.sql_name())
        } else {
            format!("{} {} NOT NULL", self.name, self.ty.sql_name())
        }
    }
}

/// A typed field declared by an entity kind.
///
/// Field names starting with `_` are internal: they exist on the
/// in-memory struct but are never persisted, and are skipped during
/// schema derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Database type the field maps to.
    pub ty: ColumnType,
    /// Whether the field is optional (maps to a nullable column).
    pub nullable: bool,
}

impl FieldDef {
    /// Declare a required field.
    pub fn required(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            nullable: false,
        }
    }

    /// Declare an optional field (nullable column).
    pub fn optional(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            nullable: true,
        }
    }

    /// Declare a required foreign-key field referencing another table.
    pub fn foreign(name: &str, target_table: &str) -> Self {
        Self::required(name, ColumnType::Foreign(target_table.to_owned()))
    }

    /// Declare an optional foreign-key field referencing another table.
    pub fn foreign_optional(name: &str, target_table: &str) -> Self {
        Self::optional(name, ColumnType::Foreign(target_table.to_owned()))
    }

    /// Whether this field is internal (non-persisted marker prefix).
    pub fn is_internal(&self) -> bool {
        self.name.starts_with('_')
    }

    /// Convert this declaration into a schema column.
    pub fn into_column(self) -> Column {
        Column {
            name: self.name,
            ty: self.ty,
            nullable: self.nullable,
        }
    }
}
