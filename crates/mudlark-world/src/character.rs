//! Player characters, monsters and other actors.

use mudlark_entity::{EntityError, Record, ValueReader};
use mudlark_schema::{ColumnType, FieldDef, Value};

/// A character in the world.
///
/// A character owned by a user is a player character; all others are
/// NPCs. A freshly created character has no place until it is moved to
/// its starting place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Character {
    /// Numeric game-object type id (see the type registry).
    pub type_id: i32,
    /// Display name overriding the type's, if any.
    pub name: Option<String>,
    /// The place the character is at, if any.
    pub place: Option<i32>,
    /// The owning user, if this is a player character.
    pub owner: Option<i32>,
}

impl Record for Character {
    const KIND: &'static str = "character";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::required("type_id", ColumnType::Integer),
            FieldDef::optional("name", ColumnType::Text),
            FieldDef::foreign_optional("place", "mud_place"),
            FieldDef::foreign_optional("owner", "mud_user"),
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

/// A character creation option offered to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterTemplate {
    /// Numeric type id of the character to create.
    pub type_id: i32,
    /// Description shown when choosing.
    pub description: String,
    /// Items the new character starts with.
    pub inventory: Vec<ItemTemplate>,
}

/// An item granted by a character template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTemplate {
    /// Numeric type id of the item to create.
    pub type_id: i32,
    /// Display name overriding the type's, if any.
    pub name: Option<String>,
}
