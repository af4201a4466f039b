//! Entity version control core: ids, wire envelopes, settings, export documents and task results.

pub mod context;
pub mod export;
pub mod hash;
pub mod messages;
pub mod requests;
pub mod results;
pub mod settings;
pub mod types;

pub use context::RequestContext;
pub use export::{EntityExportData, EntityRelation};
pub use requests::{
    EntityTypeVersionCreateConfig, EntityTypeVersionLoadConfig, SyncStrategy,
    VersionCreateConfig, VersionCreateRequest, VersionCreateSelection, VersionLoadConfig,
    VersionLoadRequest,
};
pub use results::{EntityLoadError, EntityTypeLoadResult, VersionCreationResult, VersionLoadResult};
pub use settings::{RepositoryAuthMethod, RepositorySettings};
pub use types::{
    BranchInfo, EntityId, EntityType, EntityVersion, EntityVersionsDiff, PageData, PageLink,
    SortDirection, SortOrder, TenantId, VersionedEntityInfo,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
