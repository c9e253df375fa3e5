use crate::auth::Session;
use crate::error::ApiError;
use crate::responses::ErrorKey;
use crate::types::UserRole;
use std::collections::HashMap;

/// Caller and scope of one authorized request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session: Session,
    pub organization_id: Option<String>,
    pub role: Option<UserRole>,
    pub query: HashMap<String, String>,
}

impl RequestContext {
    pub fn user_id(&self) -> &str {
        &self.session.user_id
    }

    /// Organization the request was authorized against
    pub fn organization(&self) -> Result<&str, ApiError> {
        self.organization_id.as_deref().ok_or_else(|| {
            ApiError::validation(ErrorKey::OrganizationIdRequired, "organizationID is required")
        })
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(|s| s.as_str()).filter(|s| !s.is_empty())
    }

    /// Customers only see their own data
    pub fn is_customer(&self) -> bool {
        self.role == Some(UserRole::Customer)
    }
}

/// Reject a request body whose organization differs from the authorized one
pub fn ensure_same_organization(ctx: &RequestContext, body_org: &str) -> Result<(), ApiError> {
    match ctx.organization_id.as_deref() {
        Some(org) if org == body_org => Ok(()),
        _ => Err(ApiError::validation(
            ErrorKey::OrganizationNotFound,
            "organizationID does not match the authorized organization",
        )),
    }
}
