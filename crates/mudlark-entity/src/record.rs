//! The record contract every entity kind implements.
//!
//! A kind describes its persisted fields once, statically, and converts
//! between its struct form and the positional [`Value`] form the
//! generated SQL uses. The conversion order is fixed by the derived
//! schema: columns are alphabetical by field name, so
//! [`Record::to_values`] and [`Record::from_values`] must produce and
//! consume values in that order. [`ValueReader`] keeps `from_values`
//! implementations honest by checking types field by field.

use mudlark_schema::{table_name_for, FieldDef, TableSchema, Value};

use crate::error::EntityError;

/// A persistable entity kind.
///
/// Implementations declare their fields and convert to/from positional
/// column values. The `id` primary key is not a field: the runtime owns
/// id assignment and storage.
pub trait Record: Sized + Send + Sync + 'static {
    /// Kind identifier; the table name is derived from it.
    const KIND: &'static str;

    /// The kind's persisted field declarations.
    ///
    /// Order does not matter here (derivation sorts), but names must be
    /// unique and must not include the reserved `id`.
    fn fields() -> Vec<FieldDef>;

    /// This kind's column values, in schema (alphabetical) order.
    fn to_values(&self) -> Vec<Value>;

    /// Rebuild a record from column values in schema order.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Decode`] if a value has the wrong type.
    fn from_values(values: Vec<Value>) -> Result<Self, EntityError>;

    /// The derived table name for this kind.
    fn table_name() -> String {
        table_name_for(Self::KIND)
    }

    /// Derive this kind's table schema.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Registration`] for duplicate or reserved
    /// field names.
    fn schema() -> Result<TableSchema, EntityError> {
        Ok(TableSchema::derive(&Self::table_name(), &Self::fields())?)
    }
}

/// Sequential typed reader over positional column values.
///
/// Used by [`Record::from_values`] implementations: call one `next_*`
/// method per field, in schema order.
#[derive(Debug)]
pub struct ValueReader {
    kind: &'static str,
    values: std::vec::IntoIter<Value>,
}

impl ValueReader {
    /// Wrap the values produced for a row of the given kind.
    pub fn new(kind: &'static str, values: Vec<Value>) -> Self {
        Self {
            kind,
            values: values.into_iter(),
        }
    }

    fn decode_error(&self, field: &str, expected: &'static str) -> EntityError {
        EntityError::Decode {
            kind: self.kind,
            field: field.to_owned(),
            expected,
        }
    }

    /// Read an optional boolean field.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Decode`] on type mismatch or exhaustion.
    pub fn next_bool_opt(&mut self, field: &str) -> Result<Option<bool>, EntityError> {
        match self.values.next() {
            Some(Value::Bool(v)) => Ok(v),
            _ => Err(self.decode_error(field, "boolean")),
        }
    }

    /// Read a required boolean field.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Decode`] on type mismatch or NULL.
    pub fn next_bool(&mut self, field: &str) -> Result<bool, EntityError> {
        self.next_bool_opt(field)?
            .ok_or_else(|| self.decode_error(field, "non-null boolean"))
    }

    /// Read an optional integer field.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Decode`] on type mismatch or exhaustion.
    pub fn next_int_opt(&mut self, field: &str) -> Result<Option<i32>, EntityError> {
        match self.values.next() {
            Some(Value::Int(v)) => Ok(v),
            _ => Err(self.decode_error(field, "integer")),
        }
    }

    /// Read a required integer field.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Decode`] on type mismatch or NULL.
    pub fn next_int(&mut self, field: &str) -> Result<i32, EntityError> {
        self.next_int_opt(field)?
            .ok_or_else(|| self.decode_error(field, "non-null integer"))
    }

    /// Read an optional double-precision field.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Decode`] on type mismatch or exhaustion.
    pub fn next_double_opt(&mut self, field: &str) -> Result<Option<f64>, EntityError> {
        match self.values.next() {
            Some(Value::Double(v)) => Ok(v),
            _ => Err(self.decode_error(field, "double precision")),
        }
    }

    /// Read a required double-precision field.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Decode`] on type mismatch or NULL.
    pub fn next_double(&mut self, field: &str) -> Result<f64, EntityError> {
        self.next_double_opt(field)?
            .ok_or_else(|| self.decode_error(field, "non-null double precision"))
    }

    /// Read an optional text field.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Decode`] on type mismatch or exhaustion.
    pub fn next_text_opt(&mut self, field: &str) -> Result<Option<String>, EntityError> {
        match self.values.next() {
            Some(Value::Text(v)) => Ok(v),
            _ => Err(self.decode_error(field, "text")),
        }
    }

    /// Read a required text field.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Decode`] on type mismatch or NULL.
    pub fn next_text(&mut self, field: &str) -> Result<String, EntityError> {
        self.next_text_opt(field)?
            .ok_or_else(|| self.decode_error(field, "non-null text"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reader_walks_values_in_order() {
        let mut reader = ValueReader::new(
            "widget",
            vec![Value::from(3), Value::from("label"), Value::from(true)],
        );
        assert_eq!(reader.next_int("count").unwrap(), 3);
        assert_eq!(reader.next_text("label").unwrap(), "label");
        assert!(reader.next_bool("flag").unwrap());
    }

    #[test]
    fn reader_rejects_type_mismatch() {
        let mut reader = ValueReader::new("widget", vec![Value::from("oops")]);
        let err = reader.next_int("count").unwrap_err();
        assert!(matches!(err, EntityError::Decode { .. }));
    }

    #[test]
    fn reader_rejects_null_in_required_field() {
        let mut reader = ValueReader::new("widget", vec![Value::Text(None)]);
        let err = reader.next_text("label").unwrap_err();
        assert!(matches!(err, EntityError::Decode { .. }));
    }

    #[test]
    fn reader_rejects_exhaustion() {
        let mut reader = ValueReader::new("widget", vec![]);
        assert!(reader.next_int("count").is_err());
    }

    #[test]
    fn reader_accepts_null_in_optional_field() {
        let mut reader = ValueReader::new("widget", vec![Value::Text(None)]);
        assert_eq!(reader.next_text_opt("label").unwrap(), None);
    }
}
