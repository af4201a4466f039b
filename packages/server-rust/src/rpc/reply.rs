//! Typed result of a completed repository request.

use entityvc_core::messages::CommitResponsePayload;
use entityvc_core::{
    BranchInfo, EntityExportData, EntityVersion, EntityVersionsDiff, PageData, VersionedEntityInfo,
};

use crate::error::VcError;

/// What a pending request resolves to once its response (or every chunk of
/// it) has arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack,
    Commit(CommitResponsePayload),
    Branches(Vec<BranchInfo>),
    Entities(Vec<VersionedEntityInfo>),
    Versions(PageData<EntityVersion>),
    EntityContent(EntityExportData),
    EntitiesContent(Vec<EntityExportData>),
    VersionsDiff(Vec<EntityVersionsDiff>),
}

impl Reply {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Ack => "ack",
            Reply::Commit(_) => "commit",
            Reply::Branches(_) => "branches",
            Reply::Entities(_) => "entities",
            Reply::Versions(_) => "versions",
            Reply::EntityContent(_) => "entity_content",
            Reply::EntitiesContent(_) => "entities_content",
            Reply::VersionsDiff(_) => "versions_diff",
        }
    }

    fn unexpected(self, expected: &'static str) -> VcError {
        VcError::UnexpectedResponse {
            expected,
            actual: self.kind(),
        }
    }

    /// # Errors
    ///
    /// Returns [`VcError::UnexpectedResponse`] for any other variant.
    pub fn into_ack(self) -> Result<(), VcError> {
        match self {
            Reply::Ack => Ok(()),
            other => Err(other.unexpected("ack")),
        }
    }

    /// # Errors
    ///
    /// Returns [`VcError::UnexpectedResponse`] for any other variant.
    pub fn into_commit(self) -> Result<CommitResponsePayload, VcError> {
        match self {
            Reply::Commit(commit) => Ok(commit),
            other => Err(other.unexpected("commit")),
        }
    }

    /// # Errors
    ///
    /// Returns [`VcError::UnexpectedResponse`] for any other variant.
    pub fn into_branches(self) -> Result<Vec<BranchInfo>, VcError> {
        match self {
            Reply::Branches(branches) => Ok(branches),
            other => Err(other.unexpected("branches")),
        }
    }

    /// # Errors
    ///
    /// Returns [`VcError::UnexpectedResponse`] for any other variant.
    pub fn into_entities(self) -> Result<Vec<VersionedEntityInfo>, VcError> {
        match self {
            Reply::Entities(entities) => Ok(entities),
            other => Err(other.unexpected("entities")),
        }
    }

    /// # Errors
    ///
    /// Returns [`VcError::UnexpectedResponse`] for any other variant.
    pub fn into_versions(self) -> Result<PageData<EntityVersion>, VcError> {
        match self {
            Reply::Versions(page) => Ok(page),
            other => Err(other.unexpected("versions")),
        }
    }

    /// # Errors
    ///
    /// Returns [`VcError::UnexpectedResponse`] for any other variant.
    pub fn into_entity_content(self) -> Result<EntityExportData, VcError> {
        match self {
            Reply::EntityContent(data) => Ok(data),
            other => Err(other.unexpected("entity_content")),
        }
    }

    /// # Errors
    ///
    /// Returns [`VcError::UnexpectedResponse`] for any other variant.
    pub fn into_entities_content(self) -> Result<Vec<EntityExportData>, VcError> {
        match self {
            Reply::EntitiesContent(items) => Ok(items),
            other => Err(other.unexpected("entities_content")),
        }
    }

    /// # Errors
    ///
    /// Returns [`VcError::UnexpectedResponse`] for any other variant.
    pub fn into_versions_diff(self) -> Result<Vec<EntityVersionsDiff>, VcError> {
        match self {
            Reply::VersionsDiff(diffs) => Ok(diffs),
            other => Err(other.unexpected("versions_diff")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_variant_names_both_sides() {
        let err = Reply::Ack.into_commit().unwrap_err();
        match err {
            VcError::UnexpectedResponse { expected, actual } => {
                assert_eq!(expected, "commit");
                assert_eq!(actual, "ack");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn matching_variant_unwraps() {
        assert!(Reply::Ack.into_ack().is_ok());
        assert!(Reply::EntitiesContent(Vec::new())
            .into_entities_content()
            .unwrap()
            .is_empty());
    }
}
