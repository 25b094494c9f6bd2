//! Query filter DSL for entity selects.
//!
//! A [`Filter`] is a small tagged struct `{kind, field, op, value}`; a
//! select ANDs its filters together. The supported operators are the six
//! single-column comparisons -- anything richer goes through the raw
//! passthrough query API instead.
//!
//! Field names and operators never come from user input (they are typed
//! into call sites), so they can be spliced into SQL text directly;
//! values are always bound as positional parameters.

use mudlark_schema::Value;

use crate::error::EntityError;
use crate::record::Record;

/// A comparison operator usable in a select filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Op {
    /// The SQL spelling of this operator.
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// A reference to a field of a specific kind, ready to be compared.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    kind: &'static str,
    name: &'static str,
}

impl Field {
    /// Reference a field of kind `E`.
    pub fn of<E: Record>(name: &'static str) -> Self {
        Self {
            kind: E::KIND,
            name,
        }
    }

    fn compare(self, op: Op, value: Value) -> Filter {
        Filter {
            kind: self.kind,
            field: self.name,
            op,
            value,
        }
    }

    /// `field < value`
    pub fn lt(self, value: impl Into<Value>) -> Filter {
        self.compare(Op::Lt, value.into())
    }

    /// `field <= value`
    pub fn le(self, value: impl Into<Value>) -> Filter {
        self.compare(Op::Le, value.into())
    }

    /// `field = value`
    pub fn eq(self, value: impl Into<Value>) -> Filter {
        self.compare(Op::Eq, value.into())
    }

    /// `field != value`
    pub fn ne(self, value: impl Into<Value>) -> Filter {
        self.compare(Op::Ne, value.into())
    }

    /// `field > value`
    pub fn gt(self, value: impl Into<Value>) -> Filter {
        self.compare(Op::Gt, value.into())
    }

    /// `field >= value`
    pub fn ge(self, value: impl Into<Value>) -> Filter {
        self.compare(Op::Ge, value.into())
    }
}

/// One comparison in a select's WHERE clause.
#[derive(Debug, Clone)]
pub struct Filter {
    /// The kind the compared field belongs to.
    pub kind: &'static str,
    /// The compared field.
    pub field: &'static str,
    /// The comparison operator.
    pub op: Op,
    /// The literal to compare against (bound as a parameter).
    pub value: Value,
}

/// Render filters into a WHERE clause and its bound parameters.
///
/// Returns an empty clause for an empty filter list. Placeholders start
/// at `$1`.
///
/// # Errors
///
/// Returns [`EntityError::ForeignFilter`] if any filter belongs to a
/// different kind than `E`.
pub(crate) fn render_where<E: Record>(
    filters: &[Filter],
) -> Result<(String, Vec<Value>), EntityError> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for (filter, placeholder) in filters.iter().zip(1..) {
        if filter.kind != E::KIND {
            return Err(EntityError::ForeignFilter {
                expected: E::KIND,
                got: filter.kind,
            });
        }
        clauses.push(format!(
            "{} {} ${placeholder}",
            filter.field,
            filter.op.sql()
        ));
        params.push(filter.value.clone());
    }
    if clauses.is_empty() {
        Ok((String::new(), params))
    } else {
        Ok((format!(" WHERE {}", clauses.join(" AND ")), params))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mudlark_schema::FieldDef;

    use super::*;

    struct Widget;

    impl Record for Widget {
        const KIND: &'static str = "widget";

        fn fields() -> Vec<FieldDef> {
            vec![FieldDef::required(
                "count",
                mudlark_schema::ColumnType::Integer,
            )]
        }

        fn to_values(&self) -> Vec<Value> {
            vec![]
        }

        fn from_values(_values: Vec<Value>) -> Result<Self, EntityError> {
            Ok(Self)
        }
    }

    struct Other;

    impl Record for Other {
        const KIND: &'static str = "other";

        fn fields() -> Vec<FieldDef> {
            vec![]
        }

        fn to_values(&self) -> Vec<Value> {
            vec![]
        }

        fn from_values(_values: Vec<Value>) -> Result<Self, EntityError> {
            Ok(Self)
        }
    }

    #[test]
    fn filters_render_as_anded_positional_clauses() {
        let filters = vec![
            Field::of::<Widget>("count").gt(5),
            Field::of::<Widget>("count").le(10),
        ];
        let (clause, params) = render_where::<Widget>(&filters).unwrap();
        assert_eq!(clause, " WHERE count > $1 AND count <= $2");
        assert_eq!(params, vec![Value::from(5), Value::from(10)]);
    }

    #[test]
    fn empty_filter_list_renders_nothing() {
        let (clause, params) = render_where::<Widget>(&[]).unwrap();
        assert!(clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn foreign_kind_filter_is_rejected() {
        let filters = vec![Field::of::<Other>("count").eq(1)];
        let err = render_where::<Widget>(&filters).unwrap_err();
        assert!(matches!(
            err,
            EntityError::ForeignFilter {
                expected: "widget",
                got: "other"
            }
        ));
    }

    #[test]
    fn all_operators_have_sql_spellings() {
        assert_eq!(Op::Lt.sql(), "<");
        assert_eq!(Op::Le.sql(), "<=");
        assert_eq!(Op::Eq.sql(), "=");
        assert_eq!(Op::Ne.sql(), "!=");
        assert_eq!(Op::Gt.sql(), ">");
        assert_eq!(Op::Ge.sql(), ">=");
    }
}
