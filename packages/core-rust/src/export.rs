//! Portable entity documents stored in the repository.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EntityId, EntityType};

/// Directed relation from the exported entity to another entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelation {
    pub to: EntityId,
    pub relation_type: String,
}

/// One entity as written to `<type>/<uuid>.json` in the repository.
///
/// `entity` is opaque to the relay; only the entity codec interprets it.
/// External ids of referenced entities live inside `entity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityExportData {
    pub entity_type: EntityType,
    pub external_id: EntityId,
    pub name: String,
    pub entity: Value,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub relations: Vec<EntityRelation>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub credentials: Option<Value>,
}

impl EntityExportData {
    /// Repository path this document is stored under.
    #[must_use]
    pub fn relative_path(&self) -> String {
        self.external_id.relative_path()
    }

    /// Pretty-printed JSON as committed to the repository.
    ///
    /// # Errors
    ///
    /// Returns an error if a JSON value in the document cannot be serialized.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// # Errors
    ///
    /// Returns an error if `json` is not a valid export document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
