//! Places, passages between them, and per-place change tracking.

use std::collections::HashMap;

use mudlark_entity::{Entity, EntityError, Record, ValueReader};
use mudlark_schema::{ColumnType, FieldDef, Value};
use serde::{Deserialize, Serialize};

use crate::character::Character;

/// Address of the fallback place created into an empty database.
pub const LIMBO_ADDRESS: &str = "mud.limbo";

/// A place in the world.
///
/// Each place has a unique string address in addition to its numeric
/// id. Addresses are used mostly in content creation tools; players are
/// usually shown titles, but both are public knowledge. Header text is
/// rendered by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    /// Unique string address, e.g. `mud.limbo`.
    pub address: String,
    /// Title shown to players.
    pub title: String,
    /// Longer descriptive text rendered by the client.
    pub header: String,
}

impl Record for Place {
    const KIND: &'static str = "place";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::required("address", ColumnType::Text),
            FieldDef::required("title", ColumnType::Text),
            FieldDef::required("header", ColumnType::Text),
        ]
    }

    fn to_values(&self) -> Vec<Value> {
        // Schema order is alphabetical: address, header, title.
        vec![
            Value::from(self.address.clone()),
            Value::from(self.header.clone()),
            Value::from(self.title.clone()),
        ]
    }

    fn from_values(values: Vec<Value>) -> Result<Self, EntityError> {
        let mut reader = ValueReader::new(Self::KIND, values);
        Ok(Self {
            address: reader.next_text("address")?,
            header: reader.next_text("header")?,
            title: reader.next_text("title")?,
        })
    }
}

/// A one-way passage from a place to another.
///
/// A passage can only be entered from the place it belongs to; rooms
/// that allow movement both ways get a passage each. Unnamed passages
/// inherit the name of their target. Hidden passages never show their
/// names to players.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    /// The place this passage leaves from.
    pub place: i32,
    /// The place this passage leads to.
    pub target: i32,
    /// Optional display name overriding the target's.
    pub name: Option<String>,
    /// Whether the passage is hidden from the exit list.
    pub hidden: bool,
}

impl Record for Passage {
    const KIND: &'static str = "passage";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::foreign("place", "mud_place"),
            FieldDef::foreign("target", "mud_place"),
            FieldDef::optional("name", ColumnType::Text),
            FieldDef::required("hidden", ColumnType::Boolean),
        ]
    }

    fn to_values(&self) -> Vec<Value> {
        // Schema order: hidden, name, place, target.
        vec![
            Value::from(self.hidden),
            Value::from(self.name.clone()),
            Value::from(self.place),
            Value::from(self.target),
        ]
    }

    fn from_values(values: Vec<Value>) -> Result<Self, EntityError> {
        let mut reader = ValueReader::new(Self::KIND, values);
        Ok(Self {
            hidden: reader.next_bool("hidden")?,
            name: reader.next_text_opt("name")?,
            place: reader.next_int("place")?,
            target: reader.next_int("target")?,
        })
    }
}

/// Client-facing passage description.
///
/// Clients deal in target addresses, never in place ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageData {
    /// Address of the target place.
    pub address: String,
    /// Optional display name.
    pub name: Option<String>,
    /// Whether the passage is hidden from the exit list.
    pub hidden: bool,
}

/// A passage resolved together with its cached target data.
#[derive(Debug, Clone)]
pub struct PassageView {
    /// The passage entity.
    pub passage: Entity<Passage>,
    /// Address of the target place.
    pub address: String,
    /// Title of the target place.
    pub target_title: String,
}

impl PassageView {
    /// The client-facing form of this passage.
    pub fn client_data(&self) -> PassageData {
        let (name, hidden) = self.passage.read(|p| (p.name.clone(), p.hidden));
        PassageData {
            address: self.address.clone(),
            name,
            hidden,
        }
    }
}

/// What changed at a place during one tick.
///
/// Flags accumulate as things change and are swapped out at the start
/// of the place's tick, so changes landing mid-tick carry over to the
/// next one. Tick handlers use them to decide which updates to push to
/// clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    /// Title or header text changed.
    pub details: bool,
    /// Passages leaving the place changed.
    pub passages: bool,
    /// A character entered or left.
    pub characters: bool,
    /// Items at the place changed.
    pub items: bool,
}

impl ChangeFlags {
    /// No changes.
    pub const NONE: Self = Self {
        details: false,
        passages: false,
        characters: false,
        items: false,
    };

    /// Only the details flag.
    pub const DETAILS: Self = Self {
        details: true,
        ..Self::NONE
    };

    /// Only the passages flag.
    pub const PASSAGES: Self = Self {
        passages: true,
        ..Self::NONE
    };

    /// Only the characters flag.
    pub const CHARACTERS: Self = Self {
        characters: true,
        ..Self::NONE
    };

    /// Only the items flag.
    pub const ITEMS: Self = Self {
        items: true,
        ..Self::NONE
    };

    /// Whether any flag is set.
    pub const fn any(self) -> bool {
        self.details || self.passages || self.characters || self.items
    }

    /// Union of two flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            details: self.details || other.details,
            passages: self.passages || other.passages,
            characters: self.characters || other.characters,
            items: self.items || other.items,
        }
    }
}

/// Live, non-persisted state of one loaded place.
///
/// Kept in a side table keyed by place id so that unloading the place
/// entity also lets its live state go.
#[derive(Default)]
pub(crate) struct PlaceState {
    /// Characters currently at the place, by id.
    pub(crate) characters: HashMap<i32, Entity<Character>>,
    /// Passages leaving the place, keyed by target address.
    pub(crate) passages: HashMap<String, PassageView>,
    /// Whether characters and passages have been loaded.
    pub(crate) loaded: bool,
    /// Changes accumulated since the place last ticked.
    pub(crate) changes: ChangeFlags,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn change_flags_union_and_any() {
        assert!(!ChangeFlags::NONE.any());
        assert!(ChangeFlags::DETAILS.any());

        let merged = ChangeFlags::PASSAGES.union(ChangeFlags::CHARACTERS);
        assert!(merged.passages);
        assert!(merged.characters);
        assert!(!merged.details);
        assert!(!merged.items);
        assert!(merged.any());
    }

    #[test]
    fn change_flags_default_is_none() {
        assert_eq!(ChangeFlags::default(), ChangeFlags::NONE);
    }

    #[test]
    fn place_values_round_trip_in_schema_order() {
        let place = Place {
            address: "mud.spring".to_owned(),
            title: "A spring".to_owned(),
            header: "Cold water.".to_owned(),
        };
        let values = place.to_values();
        // address, header, title
        assert_eq!(values[0], Value::from("mud.spring"));
        assert_eq!(values[1], Value::from("Cold water."));
        assert_eq!(values[2], Value::from("A spring"));
        assert_eq!(Place::from_values(values).unwrap(), place);
    }

    #[test]
    fn passage_values_round_trip_in_schema_order() {
        let passage = Passage {
            place: 1,
            target: 2,
            name: None,
            hidden: true,
        };
        let values = passage.to_values();
        // hidden, name, place, target
        assert_eq!(values[0], Value::from(true));
        assert_eq!(values[1], Value::Text(None));
        assert_eq!(values[2], Value::from(1));
        assert_eq!(values[3], Value::from(2));
        assert_eq!(Passage::from_values(values).unwrap(), passage);
    }

    #[test]
    fn passage_schema_references_place_table_twice() {
        let schema = Passage::schema().unwrap();
        let foreign: Vec<&str> = schema
            .columns
            .iter()
            .filter_map(|c| c.ty.foreign_target())
            .collect();
        assert_eq!(foreign, vec!["mud_place", "mud_place"]);
    }
}
