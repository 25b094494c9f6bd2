//! Game-object types and their persisted numeric id mappings.
//!
//! Game content declares [`ObjType`] descriptors (characters, items) by
//! internal string id. The database stores only numeric ids, so the
//! string-to-number mapping itself is persisted as a [`TypeMapping`]
//! entity and resolved once at startup into a [`TypeRegistry`].

use std::collections::HashMap;

use mudlark_entity::{EntityError, EntityRuntime, Field, Record, ValueReader};
use mudlark_schema::{ColumnType, FieldDef, Value};

use crate::error::WorldError;

/// A static game-object type descriptor.
///
/// Every type has a unique internal id string and a user-facing name;
/// the optional lore is longer descriptive text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjType {
    /// Unique internal identifier, e.g. `char.goblin` or `item.sword`.
    pub id_str: String,
    /// User-facing name.
    pub name: String,
    /// Longer descriptive text, if any.
    pub lore: Option<String>,
}

impl ObjType {
    /// Create a descriptor without lore.
    pub fn new(id_str: &str, name: &str) -> Self {
        Self {
            id_str: id_str.to_owned(),
            name: name.to_owned(),
            lore: None,
        }
    }

    /// Attach lore text.
    #[must_use]
    pub fn with_lore(mut self, lore: &str) -> Self {
        self.lore = Some(lore.to_owned());
        self
    }
}

/// Persisted mapping row assigning a numeric id to a type id string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    /// The type's internal string id.
    pub id_str: String,
}

impl Record for TypeMapping {
    const KIND: &'static str = "type_mapping";

    fn fields() -> Vec<FieldDef> {
        vec![FieldDef::required("id_str", ColumnType::Text)]
    }

    fn to_values(&self) -> Vec<Value> {
        vec![Value::from(self.id_str.clone())]
    }

    fn from_values(values: Vec<Value>) -> Result<Self, EntityError> {
        let mut reader = ValueReader::new(Self::KIND, values);
        Ok(Self {
            id_str: reader.next_text("id_str")?,
        })
    }
}

/// Resolved two-way mapping between numeric type ids and descriptors.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_id: HashMap<i32, ObjType>,
    ids: HashMap<String, i32>,
}

impl TypeRegistry {
    /// Resolve every declared type against the persisted mappings,
    /// creating mapping rows for types seen for the first time.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn initialize(
        runtime: &EntityRuntime,
        declared: Vec<ObjType>,
    ) -> Result<Self, WorldError> {
        let mut registry = Self::default();
        for obj_type in declared {
            let mapping = match runtime
                .select_one::<TypeMapping>(&[
                    Field::of::<TypeMapping>("id_str").eq(obj_type.id_str.clone())
                ])
                .await?
            {
                Some(existing) => existing,
                None => {
                    tracing::debug!(id_str = %obj_type.id_str, "Persisting new object type mapping");
                    runtime.create(TypeMapping {
                        id_str: obj_type.id_str.clone(),
                    })?
                }
            };
            registry.ids.insert(obj_type.id_str.clone(), mapping.id());
            registry.by_id.insert(mapping.id(), obj_type);
        }
        tracing::info!(types = registry.by_id.len(), "Object type registry ready");
        Ok(registry)
    }

    /// Look up a descriptor by its persisted numeric id.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownObjType`] for an unmapped id.
    pub fn by_id(&self, id: i32) -> Result<&ObjType, WorldError> {
        self.by_id.get(&id).ok_or(WorldError::UnknownObjType { id })
    }

    /// Look up the numeric id assigned to a type id string.
    pub fn id_of(&self, id_str: &str) -> Option<i32> {
        self.ids.get(id_str).copied()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no types are registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
