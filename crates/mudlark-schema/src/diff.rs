//! Schema deltas and migration alter requests.
//!
//! [`TableSchema::diff`] compares the schema-of-record (what production
//! already committed to) against a kind's current field declarations and
//! produces the [`AlterRequest`]s needed to bring an existing table in
//! line. The requests become migration scripts; they are rendered as
//! plain SQL text because scripts are written to disk and reviewed by an
//! operator, not executed as prepared statements.

use std::collections::BTreeMap;

use crate::column::FieldDef;
use crate::table::TableSchema;

/// Placeholder token for the backfill value of a new non-null column.
///
/// SQL cannot add a non-null column to a non-empty table atomically
/// without a default, so the generated script backfills existing rows
/// with an operator-supplied value before setting `NOT NULL`.
pub const EXISTING_VALUE_TOKEN: &str = "$existing_value$";

/// A single requested table alteration.
///
/// Carries a human-readable description, the SQL statements implementing
/// it, and a map of placeholder tokens to prompts for any values the
/// operator must supply before the statements are usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterRequest {
    /// Human-readable description shown during interactive migration.
    pub description: String,
    /// The SQL statements, in execution order.
    pub sql: Vec<String>,
    /// Placeholder token -> prompt text for operator-supplied values.
    pub input_needed: BTreeMap<String, String>,
}

impl AlterRequest {
    /// An alteration that needs no operator input.
    fn automatic(description: String, sql: Vec<String>) -> Self {
        Self {
            description,
            sql,
            input_needed: BTreeMap::new(),
        }
    }
}

impl TableSchema {
    /// Compute the delta between this (stored) schema and a kind's
    /// current field declarations.
    ///
    /// Columns present here but absent from `fields` produce DROP COLUMN
    /// requests, in stored-column order. Fields absent from this schema
    /// are appended at the end in alphabetical order; nullable additions
    /// are a single statement, non-nullable additions the 3-statement
    /// add/backfill/set-not-null sequence with an operator placeholder.
    ///
    /// Returns the new schema alongside the requests. Diffing a schema
    /// against the exact fields it was derived from yields no requests.
    pub fn diff(&self, fields: &[FieldDef]) -> (Self, Vec<AlterRequest>) {
        let mut requests: Vec<AlterRequest> = Vec::new();
        let mut new_columns = Vec::new();

        // Drop columns that no longer have fields. Internal fields never
        // made it into a schema, so they cannot keep a column alive.
        for column in &self.columns {
            if fields.iter().any(|f| !f.is_internal() && f.name == column.name) {
                new_columns.push(column.clone());
            } else {
                requests.push(AlterRequest::automatic(
                    format!("drop column {}", column.name),
                    vec![format!("ALTER TABLE {} DROP COLUMN {}", self.name, column.name)],
                ));
            }
        }

        // Append columns for new fields, in alphabetical order.
        let mut added: Vec<&FieldDef> = fields
            .iter()
            .filter(|f| !f.is_internal() && self.column(&f.name).is_none())
            .collect();
        added.sort_by(|a, b| a.name.cmp(&b.name));

        for field in added {
            let column = field.clone().into_column();
            let add = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                self.name,
                column.name,
                column.ty.sql_name()
            );
            if column.nullable {
                requests.push(AlterRequest::automatic(
                    format!("add nullable column {}", column.name),
                    vec![add],
                ));
            } else {
                let mut input_needed = BTreeMap::new();
                input_needed.insert(
                    EXISTING_VALUE_TOKEN.to_owned(),
                    "value needed for existing rows".to_owned(),
                );
                requests.push(AlterRequest {
                    description: format!("add non-null column {}", column.name),
                    sql: vec![
                        add,
                        format!(
                            "UPDATE {} SET {} = {EXISTING_VALUE_TOKEN}",
                            self.name, column.name
                        ),
                        format!(
                            "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                            self.name, column.name
                        ),
                    ],
                    input_needed,
                });
            }
            new_columns.push(column);
        }

        (
            Self {
                name: self.name.clone(),
                columns: new_columns,
            },
            requests,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    fn widget_fields() -> Vec<FieldDef> {
        vec![
            FieldDef::required("count", ColumnType::Integer),
            FieldDef::optional("label", ColumnType::Text),
        ]
    }

    #[test]
    fn diff_against_own_fields_is_empty() {
        let fields = widget_fields();
        let schema = TableSchema::derive("mud_widget", &fields).unwrap();
        let (new_schema, requests) = schema.diff(&fields);
        assert_eq!(new_schema, schema);
        assert!(requests.is_empty());
    }

    #[test]
    fn added_nullable_column_is_single_statement() {
        let old = TableSchema::derive(
            "mud_widget",
            &[FieldDef::required("count", ColumnType::Integer)],
        )
        .unwrap();
        let (new_schema, requests) = old.diff(&widget_fields());

        assert_eq!(requests.len(), 1);
        let request = requests.first().unwrap();
        assert_eq!(request.description, "add nullable column label");
        assert_eq!(
            request.sql,
            vec!["ALTER TABLE mud_widget ADD COLUMN label text".to_owned()]
        );
        assert!(request.input_needed.is_empty());
        assert!(new_schema.column("label").is_some());
    }

    #[test]
    fn removed_field_drops_column() {
        let old = TableSchema::derive(
            "mud_widget",
            &[
                FieldDef::required("count", ColumnType::Integer),
                FieldDef::required("tag", ColumnType::Text),
            ],
        )
        .unwrap();
        let (new_schema, requests) =
            old.diff(&[FieldDef::required("count", ColumnType::Integer)]);

        assert_eq!(requests.len(), 1);
        let request = requests.first().unwrap();
        assert_eq!(request.description, "drop column tag");
        assert_eq!(
            request.sql,
            vec!["ALTER TABLE mud_widget DROP COLUMN tag".to_owned()]
        );
        assert!(new_schema.column("tag").is_none());
    }

    #[test]
    fn added_non_null_column_is_three_statements() {
        let old = TableSchema::derive(
            "mud_widget",
            &[FieldDef::required("count", ColumnType::Integer)],
        )
        .unwrap();
        let (_, requests) = old.diff(&[
            FieldDef::required("count", ColumnType::Integer),
            FieldDef::required("tag", ColumnType::Text),
        ]);

        assert_eq!(requests.len(), 1);
        let request = requests.first().unwrap();
        assert_eq!(request.description, "add non-null column tag");
        assert_eq!(
            request.sql,
            vec![
                "ALTER TABLE mud_widget ADD COLUMN tag text".to_owned(),
                "UPDATE mud_widget SET tag = $existing_value$".to_owned(),
                "ALTER TABLE mud_widget ALTER COLUMN tag SET NOT NULL".to_owned(),
            ]
        );
        assert_eq!(
            request.input_needed.get(EXISTING_VALUE_TOKEN).map(String::as_str),
            Some("value needed for existing rows")
        );
    }

    #[test]
    fn drops_precede_adds_and_order_is_stable() {
        let old = TableSchema::derive(
            "mud_foo",
            &[
                FieldDef::required("flag", ColumnType::Boolean),
                FieldDef::required("name", ColumnType::Text),
                FieldDef::foreign("table_ref", "mud_dummy"),
                FieldDef::optional("weight", ColumnType::Double),
            ],
        )
        .unwrap();
        let (new_schema, requests) = old.diff(&[
            FieldDef::optional("weight", ColumnType::Double),
            FieldDef::required("flag", ColumnType::Boolean),
            FieldDef::required("new_field", ColumnType::Text),
        ]);

        let descriptions: Vec<&str> =
            requests.iter().map(|r| r.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec![
                "drop column name",
                "drop column table_ref",
                "add non-null column new_field",
            ]
        );

        // Surviving columns keep stored order; additions go to the end.
        let names: Vec<&str> = new_schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["flag", "weight", "new_field"]);
    }
}
