//! Request-scoped tenant context
//!
//! Every core operation is scoped to a tenant. The HTTP collaborator resolves
//! the tenant from the session and constructs a [`TenantContext`] per request;
//! the core never derives one itself. Administrative recalculation is the only
//! path that may run without a tenant, and those call sites take
//! `Option<&TenantContext>` explicitly.

use uuid::Uuid;

/// A resolved tenant identity attached to a single unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TenantContext {
    pub tenant_id: Uuid,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id }
    }
}

impl std::fmt::Display for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tenant_id)
    }
}

/// Tenant parameter for queries that accept an optional tenant scope
/// (`tenant_id = $n OR $n IS NULL` predicates).
pub fn tenant_param(tenant: Option<&TenantContext>) -> Option<Uuid> {
    tenant.map(|t| t.tenant_id)
}
