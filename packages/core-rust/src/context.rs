use crate::types::TenantId;

/// Per-request context carrying identity and tenancy.
/// Threaded through export and import so commits carry the caller as author.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Identifier of the node handling this request.
    pub node_id: String,
    /// Tenant whose repository and entities are addressed.
    pub tenant_id: TenantId,
    /// Commit author name.
    pub author_name: String,
    /// Commit author email.
    pub author_email: String,
}

impl RequestContext {
    #[must_use]
    pub fn new(tenant_id: TenantId, author_name: impl Into<String>, author_email: impl Into<String>) -> Self {
        Self {
            node_id: String::new(),
            tenant_id,
            author_name: author_name.into(),
            author_email: author_email.into(),
        }
    }
}
