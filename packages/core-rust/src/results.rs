//! Task results written to the task status store and polled by callers.

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, EntityType, EntityVersion};

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Progress and outcome of a version create (export) task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCreationResult {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<EntityVersion>,
    pub added: u32,
    pub modified: u32,
    pub removed: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub done: bool,
}

impl VersionCreationResult {
    /// Placeholder stored before the first step runs.
    #[must_use]
    pub fn in_progress() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            done: true,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Counts for one entity type of a version load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTypeLoadResult {
    pub entity_type: EntityType,
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
}

impl EntityTypeLoadResult {
    #[must_use]
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            created: 0,
            updated: 0,
            deleted: 0,
        }
    }
}

/// Classified reason a version load failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityLoadError {
    /// Device credentials in the document did not pass validation.
    CredentialsInvalid { source: EntityId },
    /// The document references an entity that does not exist locally.
    MissingReference { source: EntityId, target: EntityId },
    RuntimeError {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        source: Option<EntityId>,
        message: String,
    },
}

impl std::fmt::Display for EntityLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityLoadError::CredentialsInvalid { source } => {
                write!(f, "invalid credentials for {source}")
            }
            EntityLoadError::MissingReference { source, target } => {
                write!(f, "{source} references missing entity {target}")
            }
            EntityLoadError::RuntimeError {
                source: Some(source),
                message,
            } => write!(f, "failed to load {source}: {message}"),
            EntityLoadError::RuntimeError {
                source: None,
                message,
            } => f.write_str(message),
        }
    }
}

/// Progress and outcome of a version load (import) task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionLoadResult {
    pub result: Vec<EntityTypeLoadResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<EntityLoadError>,
    pub done: bool,
}

impl VersionLoadResult {
    #[must_use]
    pub fn in_progress() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.done && self.error.is_none()
    }

    #[must_use]
    pub fn for_type(&self, entity_type: EntityType) -> Option<&EntityTypeLoadResult> {
        self.result.iter().find(|r| r.entity_type == entity_type)
    }
}
