//! Column values as passed to parameterized statements.
//!
//! A [`Value`] is one positional parameter of a generated INSERT, UPDATE
//! or SELECT. Nulls are typed -- `Text(None)` and `Int(None)` are
//! distinct values -- because the database driver must know the
//! parameter's SQL type even when the payload is NULL.

/// A single typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A `boolean` value, or a typed NULL.
    Bool(Option<bool>),
    /// An `integer` value (also used for foreign keys), or a typed NULL.
    Int(Option<i32>),
    /// A `double precision` value, or a typed NULL.
    Double(Option<f64>),
    /// A `text` value, or a typed NULL.
    Text(Option<String>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(Some(v))
    }
}

impl From<Option<bool>> for Value {
    fn from(v: Option<bool>) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(Some(v))
    }
}

impl From<Option<i32>> for Value {
    fn from(v: Option<i32>) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(Some(v))
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(Some(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(Some(v.to_owned()))
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        Self::Text(v)
    }
}

impl Value {
    /// Whether this value is a (typed) NULL.
    pub const fn is_null(&self) -> bool {
        matches!(
            self,
            Self::Bool(None) | Self::Int(None) | Self::Double(None) | Self::Text(None)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn conversions_preserve_type_and_payload() {
        assert_eq!(Value::from(true), Value::Bool(Some(true)));
        assert_eq!(Value::from(7), Value::Int(Some(7)));
        assert_eq!(Value::from(2.5), Value::Double(Some(2.5)));
        assert_eq!(Value::from("hi"), Value::Text(Some("hi".to_owned())));
    }

    #[test]
    fn nulls_keep_their_column_type() {
        let text_null = Value::from(Option::<String>::None);
        let int_null = Value::from(Option::<i32>::None);
        assert!(text_null.is_null());
        assert!(int_null.is_null());
        assert_ne!(text_null, int_null);
    }
}
