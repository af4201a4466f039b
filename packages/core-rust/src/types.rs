//! Identifiers and repository records shared by the relay and the repository worker.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so that `MsgPack`
//! output via `rmp_serde::to_vec_named()` matches the documents the worker
//! stores and returns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TenantId
// ---------------------------------------------------------------------------

/// Tenant scope of every repository operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

/// Kinds of entities that can be versioned.
///
/// Variant order is not significant; import ordering comes from
/// [`EntityType::import_rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Customer,
    AssetProfile,
    Asset,
    DeviceProfile,
    Device,
    EntityView,
    WidgetsBundle,
    WidgetType,
    Dashboard,
    RuleChain,
    NotificationTemplate,
    Tag,
}

impl EntityType {
    /// All versionable types, in import order.
    pub const ALL: [EntityType; 12] = [
        EntityType::Customer,
        EntityType::Tag,
        EntityType::RuleChain,
        EntityType::AssetProfile,
        EntityType::Asset,
        EntityType::DeviceProfile,
        EntityType::Device,
        EntityType::EntityView,
        EntityType::WidgetType,
        EntityType::WidgetsBundle,
        EntityType::Dashboard,
        EntityType::NotificationTemplate,
    ];

    /// Position in the referential dependency order: a type may reference
    /// only types with a lower rank (profiles before the entities using them).
    #[must_use]
    pub fn import_rank(self) -> u8 {
        match self {
            EntityType::Customer => 0,
            EntityType::Tag => 1,
            EntityType::RuleChain => 2,
            EntityType::AssetProfile => 3,
            EntityType::Asset => 4,
            EntityType::DeviceProfile => 5,
            EntityType::Device => 6,
            EntityType::EntityView => 7,
            EntityType::WidgetType => 8,
            EntityType::WidgetsBundle => 9,
            EntityType::Dashboard => 10,
            EntityType::NotificationTemplate => 11,
        }
    }

    /// Lower-case name used as the repository folder for this type.
    #[must_use]
    pub fn folder(self) -> &'static str {
        match self {
            EntityType::Customer => "customer",
            EntityType::AssetProfile => "asset_profile",
            EntityType::Asset => "asset",
            EntityType::DeviceProfile => "device_profile",
            EntityType::Device => "device",
            EntityType::EntityView => "entity_view",
            EntityType::WidgetsBundle => "widgets_bundle",
            EntityType::WidgetType => "widget_type",
            EntityType::Dashboard => "dashboard",
            EntityType::RuleChain => "rule_chain",
            EntityType::NotificationTemplate => "notification_template",
            EntityType::Tag => "tag",
        }
    }

    /// Inverse of [`EntityType::folder`].
    #[must_use]
    pub fn from_folder(folder: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.folder() == folder)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Typed entity identifier. Used both for local ids and for external ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityId {
    pub entity_type: EntityType,
    pub id: Uuid,
}

impl EntityId {
    #[must_use]
    pub fn new(entity_type: EntityType, id: Uuid) -> Self {
        Self { entity_type, id }
    }

    #[must_use]
    pub fn random(entity_type: EntityType) -> Self {
        Self::new(entity_type, Uuid::new_v4())
    }

    /// Repository path of this entity's document: `<type>/<uuid>.json`.
    #[must_use]
    pub fn relative_path(&self) -> String {
        format!("{}/{}.json", self.entity_type.folder(), self.id)
    }

    /// Parses a path produced by [`EntityId::relative_path`].
    #[must_use]
    pub fn from_relative_path(path: &str) -> Option<Self> {
        let (folder, file) = path.split_once('/')?;
        let entity_type = EntityType::from_folder(folder)?;
        let id = Uuid::from_str(file.strip_suffix(".json")?).ok()?;
        Some(Self::new(entity_type, id))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// Repository folder holding every document of the given type.
#[must_use]
pub fn type_path(entity_type: EntityType) -> String {
    entity_type.folder().to_string()
}

// ---------------------------------------------------------------------------
// Repository records
// ---------------------------------------------------------------------------

/// A committed version (commit) in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityVersion {
    pub timestamp: i64,
    pub id: String,
    pub name: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub name: String,
    pub is_default: bool,
}

/// An entity present in the repository at some version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedEntityInfo {
    pub external_id: EntityId,
}

/// Per-entity difference between two versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityVersionsDiff {
    pub external_id: EntityId,
    /// Document at the first version; empty when the entity did not exist.
    pub entity_data_at_version1: String,
    /// Document at the second version; empty when the entity did not exist.
    pub entity_data_at_version2: String,
    pub raw_diff: String,
}

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortOrder {
    pub property: String,
    pub direction: SortDirection,
}

/// Page request: zero-based page index and page size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLink {
    pub page: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text_search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sort: Option<SortOrder>,
}

impl PageLink {
    #[must_use]
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            text_search: None,
            sort: None,
        }
    }

    #[must_use]
    pub fn next_page(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }

    /// Offset of the first element of this page.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.page as usize * self.page_size as usize
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData<T> {
    pub data: Vec<T>,
    pub total_pages: u32,
    pub total_elements: u64,
    pub has_next: bool,
}

impl<T> PageData<T> {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            total_pages: 0,
            total_elements: 0,
            has_next: false,
        }
    }

    /// Cuts the page described by `link` out of a fully materialised list.
    #[must_use]
    pub fn from_slice(all: Vec<T>, link: &PageLink) -> Self {
        let total = all.len();
        let page_size = link.page_size.max(1) as usize;
        let offset = link.offset();
        #[allow(clippy::cast_possible_truncation)]
        let total_pages = total.div_ceil(page_size) as u32;
        let data: Vec<T> = all.into_iter().skip(offset).take(page_size).collect();
        Self {
            has_next: offset + data.len() < total,
            data,
            total_pages,
            total_elements: total as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
