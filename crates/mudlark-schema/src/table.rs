//! Table schema derivation and SQL rendering.
//!
//! A [`TableSchema`] is the ordered set of columns for one entity kind,
//! excluding the implicit primary key `id`. Column order is alphabetical
//! at derivation time so that generated SQL text is stable; schemas
//! produced by [`diff`](crate::diff) preserve the stored order and
//! append new columns at the end, matching how migration scripts alter
//! real tables.

use serde::{Deserialize, Serialize};

use crate::column::{Column, FieldDef};
use crate::error::SchemaError;

/// Prefix applied to every entity table name.
const TABLE_PREFIX: &str = "mud_";

/// Name of the implicit primary-key column.
pub(crate) const ID_COLUMN: &str = "id";

/// Derive the table name for an entity kind identifier.
///
/// The transform is deterministic: lowercase the kind and prepend the
/// `mud_` namespace prefix, e.g. `Place` becomes `mud_place`.
pub fn table_name_for(kind: &str) -> String {
    format!("{TABLE_PREFIX}{}", kind.to_lowercase())
}

/// An ordered set of columns for one entity kind.
///
/// The implicit `id integer PRIMARY KEY` is never stored here; every
/// rendering method that needs it emits it first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name (already prefixed).
    pub name: String,
    /// Columns, in rendering order.
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Derive a schema from an entity kind's field declarations.
    ///
    /// Skips internal fields (leading underscore) and sorts the rest
    /// alphabetically by name.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] for duplicate field names, an explicit
    /// `id` field, or an empty field name.
    pub fn derive(table_name: &str, fields: &[FieldDef]) -> Result<Self, SchemaError> {
        let mut persisted: Vec<FieldDef> = Vec::new();
        for field in fields {
            if field.name.is_empty() {
                return Err(SchemaError::EmptyFieldName {
                    table: table_name.to_owned(),
                });
            }
            if field.name == ID_COLUMN {
                return Err(SchemaError::ReservedField {
                    table: table_name.to_owned(),
                });
            }
            if field.is_internal() {
                continue;
            }
            if persisted.iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateField {
                    table: table_name.to_owned(),
                    field: field.name.clone(),
                });
            }
            persisted.push(field.clone());
        }
        persisted.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            name: table_name.to_owned(),
            columns: persisted.into_iter().map(FieldDef::into_column).collect(),
        })
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Render the `CREATE TABLE` statement for this schema.
    ///
    /// The primary key is always the first column; `NOT NULL` is
    /// appended to every non-nullable column.
    pub fn create_table_sql(&self) -> String {
        let mut rows = vec![format!("{ID_COLUMN} integer PRIMARY KEY")];
        rows.extend(self.columns.iter().map(Column::render));
        format!("CREATE TABLE {} (\n{}\n)", self.name, rows.join(",\n"))
    }

    /// Render the deferred foreign-key constraint statements.
    ///
    /// One drop-if-exists plus one add-constraint pair per foreign-key
    /// column. These run in a separate pass after all tables exist,
    /// because forward references between tables created together would
    /// otherwise fail.
    pub fn post_create_sql(&self) -> Vec<String> {
        let mut statements = Vec::new();
        for column in &self.columns {
            if let Some(target) = column.ty.foreign_target() {
                statements.push(format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS fk_{}",
                    self.name, column.name
                ));
                statements.push(format!(
                    "ALTER TABLE {} ADD CONSTRAINT fk_{} FOREIGN KEY ({}) \
                     REFERENCES {}(id) ON DELETE CASCADE",
                    self.name, column.name, column.name, target
                ));
            }
        }
        statements
    }

    /// Render the parameterized `INSERT` statement.
    ///
    /// `$1` is the entity id, `$2..$n` the column values in schema order.
    pub fn insert_sql(&self) -> String {
        let names: Vec<&str> = std::iter::once(ID_COLUMN)
            .chain(self.columns.iter().map(|c| c.name.as_str()))
            .collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("${i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.name,
            names.join(", "),
            placeholders.join(", ")
        )
    }

    /// Render the parameterized `UPDATE` statement.
    ///
    /// `$1` is the entity id (the WHERE condition), `$2..$n` the column
    /// values in schema order.
    pub fn update_sql(&self) -> String {
        let assignments: Vec<String> = self
            .columns
            .iter()
            .zip(2..)
            .map(|(c, i)| format!("{} = ${i}", c.name))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {ID_COLUMN} = $1",
            self.name,
            assignments.join(", ")
        )
    }

    /// Render the `SELECT` query without conditions.
    ///
    /// Callers append their own `WHERE` clauses. Columns are listed
    /// explicitly (id first) so row decoding never depends on the
    /// physical column order of a migrated table.
    pub fn select_sql(&self) -> String {
        let names: Vec<&str> = std::iter::once(ID_COLUMN)
            .chain(self.columns.iter().map(|c| c.name.as_str()))
            .collect();
        format!("SELECT {} FROM {}", names.join(", "), self.name)
    }

    /// Render the parameterized `DELETE` statement (`$1` is the id).
    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE {ID_COLUMN} = $1", self.name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    /// The sample fields used throughout these tests, mirroring a kind
    /// with one of every supported column type.
    fn sample_fields() -> Vec<FieldDef> {
        vec![
            FieldDef::required("name", ColumnType::Text),
            FieldDef::optional("weight", ColumnType::Double),
            FieldDef::required("flag", ColumnType::Boolean),
            FieldDef::foreign("table_ref", "mud_dummy"),
        ]
    }

    #[test]
    fn table_name_is_prefixed_and_lowercased() {
        assert_eq!(table_name_for("Place"), "mud_place");
        assert_eq!(table_name_for("character"), "mud_character");
    }

    #[test]
    fn derive_sorts_columns_alphabetically() {
        let schema = TableSchema::derive("mud_foo", &sample_fields()).unwrap();
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["flag", "name", "table_ref", "weight"]);
    }

    #[test]
    fn derive_skips_internal_fields() {
        let mut fields = sample_fields();
        fields.push(FieldDef::required("_cache_done", ColumnType::Boolean));
        let schema = TableSchema::derive("mud_foo", &fields).unwrap();
        assert!(schema.column("_cache_done").is_none());
        assert_eq!(schema.columns.len(), 4);
    }

    #[test]
    fn derive_rejects_duplicate_fields() {
        let mut fields = sample_fields();
        fields.push(FieldDef::required("name", ColumnType::Text));
        let err = TableSchema::derive("mud_foo", &fields).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn derive_rejects_explicit_id() {
        let fields = vec![FieldDef::required("id", ColumnType::Integer)];
        let err = TableSchema::derive("mud_foo", &fields).unwrap_err();
        assert!(matches!(err, SchemaError::ReservedField { .. }));
    }

    #[test]
    fn create_table_renders_id_first_and_not_null() {
        let schema = TableSchema::derive("mud_foo", &sample_fields()).unwrap();
        let expected = "CREATE TABLE mud_foo (\n\
                        id integer PRIMARY KEY,\n\
                        flag boolean NOT NULL,\n\
                        name text NOT NULL,\n\
                        table_ref integer NOT NULL,\n\
                        weight double precision\n\
                        )";
        assert_eq!(schema.create_table_sql(), expected);
    }

    #[test]
    fn widget_scenario_matches_expected_ddl() {
        // Widget { count: int, label: Optional<String> }
        let fields = vec![
            FieldDef::required("count", ColumnType::Integer),
            FieldDef::optional("label", ColumnType::Text),
        ];
        let schema = TableSchema::derive("mud_widget", &fields).unwrap();
        assert_eq!(
            schema.create_table_sql(),
            "CREATE TABLE mud_widget (\nid integer PRIMARY KEY,\ncount integer NOT NULL,\nlabel text\n)"
        );
    }

    #[test]
    fn post_create_renders_fk_constraint_pair() {
        let schema = TableSchema::derive("mud_foo", &sample_fields()).unwrap();
        assert_eq!(
            schema.post_create_sql(),
            vec![
                "ALTER TABLE mud_foo DROP CONSTRAINT IF EXISTS fk_table_ref".to_owned(),
                "ALTER TABLE mud_foo ADD CONSTRAINT fk_table_ref FOREIGN KEY (table_ref) \
                 REFERENCES mud_dummy(id) ON DELETE CASCADE"
                    .to_owned(),
            ]
        );
    }

    #[test]
    fn post_create_empty_without_foreign_keys() {
        let fields = vec![FieldDef::required("count", ColumnType::Integer)];
        let schema = TableSchema::derive("mud_widget", &fields).unwrap();
        assert!(schema.post_create_sql().is_empty());
    }

    #[test]
    fn insert_sql_places_id_first() {
        let fields = vec![
            FieldDef::required("count", ColumnType::Integer),
            FieldDef::optional("label", ColumnType::Text),
        ];
        let schema = TableSchema::derive("mud_widget", &fields).unwrap();
        assert_eq!(
            schema.insert_sql(),
            "INSERT INTO mud_widget (id, count, label) VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn update_sql_keys_by_id() {
        let fields = vec![
            FieldDef::required("count", ColumnType::Integer),
            FieldDef::optional("label", ColumnType::Text),
        ];
        let schema = TableSchema::derive("mud_widget", &fields).unwrap();
        assert_eq!(
            schema.update_sql(),
            "UPDATE mud_widget SET count = $2, label = $3 WHERE id = $1"
        );
    }

    #[test]
    fn select_sql_has_no_where() {
        let fields = vec![FieldDef::required("count", ColumnType::Integer)];
        let schema = TableSchema::derive("mud_widget", &fields).unwrap();
        assert_eq!(schema.select_sql(), "SELECT id, count FROM mud_widget");
    }

    #[test]
    fn delete_sql_keys_by_id() {
        let fields = vec![FieldDef::required("count", ColumnType::Integer)];
        let schema = TableSchema::derive("mud_widget", &fields).unwrap();
        assert_eq!(schema.delete_sql(), "DELETE FROM mud_widget WHERE id = $1");
    }

    #[test]
    fn schema_serializes_to_json_and_back() {
        let schema = TableSchema::derive("mud_foo", &sample_fields()).unwrap();
        let json = serde_json::to_string_pretty(&schema).unwrap();
        let parsed: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schema);
    }
}
