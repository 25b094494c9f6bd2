//! Physical items.

use mudlark_entity::{EntityError, Record, ValueReader};
use mudlark_schema::{ColumnType, FieldDef, Value};

/// A physical item.
///
/// An item lies at a place, is carried by a character, or is in neither
/// state while being set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Numeric game-object type id (see the type registry).
    pub type_id: i32,
    /// Display name overriding the type's, if any.
    pub name: Option<String>,
    /// The place the item lies at, if any.
    pub place: Option<i32>,
    /// The character carrying the item, if any.
    pub owner: Option<i32>,
}

impl Record for Item {
    const KIND: &'static str = "item";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::required("type_id", ColumnType::Integer),
            FieldDef::optional("name", ColumnType::Text),
            FieldDef::foreign_optional("place", "mud_place"),
            FieldDef::foreign_optional("owner", "mud_character"),
        ]
    }

    fn to_values(&self) -> Vec<Value> {
        // Schema order: name, owner, place, type_id.
        vec![
            Value::from(self.name.clone()),
            Value::Int(self.owner),
            Value::Int(self.place),
            Value::from(self.type_id),
        ]
    }

    fn from_values(values: Vec<Value>) -> Result<Self, EntityError> {
        let mut reader = ValueReader::new(Self::KIND, values);
        Ok(Self {
            name: reader.next_text_opt("name")?,
            owner: reader.next_int_opt("owner")?,
            place: reader.next_int_opt("place")?,
            type_id: reader.next_int("type_id")?,
        })
    }
}
