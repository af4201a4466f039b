//! Version create (export) and version load (import) requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{EntityId, EntityType};

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// How the entities of one type are merged into the target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStrategy {
    /// Add or update the exported documents, keep everything else.
    #[default]
    Merge,
    /// Remove every document of the type before adding the exported ones.
    Overwrite,
}

/// What to include in an exported document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCreateConfig {
    pub save_relations: bool,
    pub save_attributes: bool,
    pub save_credentials: bool,
}

impl Default for VersionCreateConfig {
    fn default() -> Self {
        Self {
            save_relations: true,
            save_attributes: true,
            save_credentials: true,
        }
    }
}

/// Per-type selection of a complex version create request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTypeVersionCreateConfig {
    #[serde(flatten)]
    pub config: VersionCreateConfig,
    /// Overrides the request-level strategy for this type.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sync_strategy: Option<SyncStrategy>,
    /// Export every entity of the type; `entity_ids` is ignored when set.
    pub all_entities: bool,
    #[serde(default)]
    pub entity_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionCreateSelection {
    SingleEntity {
        #[serde(rename = "entityId")]
        entity_id: EntityId,
        config: VersionCreateConfig,
    },
    Complex {
        #[serde(rename = "syncStrategy")]
        sync_strategy: SyncStrategy,
        #[serde(rename = "entityTypes")]
        entity_types: BTreeMap<EntityType, EntityTypeVersionCreateConfig>,
    },
}

/// Request to commit a new version to `branch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCreateRequest {
    pub version_name: String,
    pub branch: String,
    pub selection: VersionCreateSelection,
}

impl VersionCreateRequest {
    #[must_use]
    pub fn single_entity(
        branch: impl Into<String>,
        version_name: impl Into<String>,
        entity_id: EntityId,
    ) -> Self {
        Self {
            version_name: version_name.into(),
            branch: branch.into(),
            selection: VersionCreateSelection::SingleEntity {
                entity_id,
                config: VersionCreateConfig::default(),
            },
        }
    }

    #[must_use]
    pub fn complex(
        branch: impl Into<String>,
        version_name: impl Into<String>,
        sync_strategy: SyncStrategy,
        entity_types: BTreeMap<EntityType, EntityTypeVersionCreateConfig>,
    ) -> Self {
        Self {
            version_name: version_name.into(),
            branch: branch.into(),
            selection: VersionCreateSelection::Complex {
                sync_strategy,
                entity_types,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// What to restore from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionLoadConfig {
    pub load_relations: bool,
    pub load_attributes: bool,
    pub load_credentials: bool,
}

impl Default for VersionLoadConfig {
    fn default() -> Self {
        Self {
            load_relations: true,
            load_attributes: true,
            load_credentials: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTypeVersionLoadConfig {
    #[serde(flatten)]
    pub config: VersionLoadConfig,
    /// Delete local entities of the type that the version does not contain.
    pub remove_other_entities: bool,
    /// Match entities without an external id by name.
    pub find_existing_entity_by_name: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionLoadRequest {
    /// Restores one entity. Always rolls back on error.
    SingleEntity {
        #[serde(rename = "versionId")]
        version_id: String,
        #[serde(rename = "externalEntityId")]
        external_entity_id: EntityId,
        config: VersionLoadConfig,
    },
    EntityType {
        #[serde(rename = "versionId")]
        version_id: String,
        #[serde(rename = "entityTypes")]
        entity_types: BTreeMap<EntityType, EntityTypeVersionLoadConfig>,
        #[serde(rename = "rollbackOnError")]
        rollback_on_error: bool,
    },
}

impl VersionLoadRequest {
    #[must_use]
    pub fn version_id(&self) -> &str {
        match self {
            VersionLoadRequest::SingleEntity { version_id, .. }
            | VersionLoadRequest::EntityType { version_id, .. } => version_id,
        }
    }

    #[must_use]
    pub fn rollback_on_error(&self) -> bool {
        match self {
            VersionLoadRequest::SingleEntity { .. } => true,
            VersionLoadRequest::EntityType {
                rollback_on_error, ..
            } => *rollback_on_error,
        }
    }
}
