//! Registry of every API operation: path, method and the roles allowed to call it.
//!
//! The registry is a static table; operations are named by the [`Endpoint`] enum so
//! that code inside the workspace cannot refer to an unregistered operation. String
//! names (from configuration or the deployment tooling) go through [`lookup`].

use crate::types::UserRole;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("role {role} may not call {operation}")]
    RoleNotAllowed {
        operation: &'static str,
        role: UserRole,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMeta {
    pub name: &'static str,
    pub path: &'static str,
    pub method: HttpMethod,
    pub allowed_roles: &'static [UserRole],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<&'static str>,
    /// Caller must name an organization and hold a role in it
    pub organization_scoped: bool,
}

const ADMIN: &[UserRole] = &[UserRole::Admin];
const ALL_ROLES: &[UserRole] = &[UserRole::Admin, UserRole::Customer, UserRole::WarehouseManager];
const MANAGERS: &[UserRole] = &[UserRole::WarehouseManager, UserRole::Admin];
const CUSTOMERS: &[UserRole] = &[UserRole::Customer, UserRole::Admin];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Endpoint {
    GetUsers,
    SetUser,
    Start,
    RequestCheckOut,
    ApproveCheckOut,
    RejectCheckOut,
    RequestCheckIn,
    ApproveCheckIn,
    GetUserForms,
    GetUserInventory,
    GetProducts,
    SetProducts,
    AddInventory,
    RemoveInventory,
    GetInventory,
    GetAllForms,
    PublishPartialReport,
    GetReports,
}

static GET_USERS: EndpointMeta = EndpointMeta {
    name: "getUsers",
    path: "/api/admin/users",
    method: HttpMethod::Get,
    allowed_roles: ADMIN,
    request_type: None,
    response_type: Some("GetUsersResponse"),
    organization_scoped: true,
};

static SET_USER: EndpointMeta = EndpointMeta {
    name: "setUser",
    path: "/api/admin/users",
    method: HttpMethod::Post,
    allowed_roles: ADMIN,
    request_type: Some("SetUserRequest"),
    response_type: Some("BasicResponse"),
    organization_scoped: true,
};

static START: EndpointMeta = EndpointMeta {
    name: "start",
    path: "/api/start",
    method: HttpMethod::Get,
    allowed_roles: ALL_ROLES,
    request_type: None,
    response_type: Some("StartResponse"),
    organization_scoped: false,
};

static REQUEST_CHECK_OUT: EndpointMeta = EndpointMeta {
    name: "requestCheckOut",
    path: "/api/user/checkOut/request",
    method: HttpMethod::Post,
    allowed_roles: CUSTOMERS,
    request_type: Some("RequestFormRequest"),
    response_type: Some("FormResponse"),
    organization_scoped: true,
};

static APPROVE_CHECK_OUT: EndpointMeta = EndpointMeta {
    name: "approveCheckOut",
    path: "/api/user/checkOut/approve",
    method: HttpMethod::Post,
    allowed_roles: MANAGERS,
    request_type: Some("ApproveFormRequest"),
    response_type: Some("FormResponse"),
    organization_scoped: true,
};

static REJECT_CHECK_OUT: EndpointMeta = EndpointMeta {
    name: "rejectCheckOut",
    path: "/api/user/checkOut/reject",
    method: HttpMethod::Post,
    allowed_roles: MANAGERS,
    request_type: Some("RejectFormRequest"),
    response_type: Some("FormResponse"),
    organization_scoped: true,
};

static REQUEST_CHECK_IN: EndpointMeta = EndpointMeta {
    name: "requestCheckIn",
    path: "/api/user/checkIn/request",
    method: HttpMethod::Post,
    allowed_roles: CUSTOMERS,
    request_type: Some("RequestFormRequest"),
    response_type: Some("FormResponse"),
    organization_scoped: true,
};

static APPROVE_CHECK_IN: EndpointMeta = EndpointMeta {
    name: "approveCheckIn",
    path: "/api/user/checkIn/approve",
    method: HttpMethod::Post,
    allowed_roles: MANAGERS,
    request_type: Some("ApproveFormRequest"),
    response_type: Some("FormResponse"),
    organization_scoped: true,
};

static GET_USER_FORMS: EndpointMeta = EndpointMeta {
    name: "getUserForms",
    path: "/api/user/forms",
    method: HttpMethod::Get,
    allowed_roles: ALL_ROLES,
    request_type: None,
    response_type: Some("GetUserFormsResponse"),
    organization_scoped: true,
};

static GET_USER_INVENTORY: EndpointMeta = EndpointMeta {
    name: "getUserInventory",
    path: "/api/user/inventory",
    method: HttpMethod::Get,
    allowed_roles: ALL_ROLES,
    request_type: None,
    response_type: Some("GetUserInventoryResponse"),
    organization_scoped: true,
};

static GET_PRODUCTS: EndpointMeta = EndpointMeta {
    name: "getProducts",
    path: "/api/warehouse/products",
    method: HttpMethod::Get,
    allowed_roles: ALL_ROLES,
    request_type: None,
    response_type: Some("GetProductsResponse"),
    organization_scoped: true,
};

static SET_PRODUCTS: EndpointMeta = EndpointMeta {
    name: "setProducts",
    path: "/api/warehouse/products/set",
    method: HttpMethod::Post,
    allowed_roles: MANAGERS,
    request_type: Some("SetProductsRequest"),
    response_type: Some("BasicResponse"),
    organization_scoped: true,
};

static ADD_INVENTORY: EndpointMeta = EndpointMeta {
    name: "addInventory",
    path: "/api/warehouse/inventory/add",
    method: HttpMethod::Post,
    allowed_roles: MANAGERS,
    request_type: Some("InventoryChangeRequest"),
    response_type: Some("BasicResponse"),
    organization_scoped: true,
};

static REMOVE_INVENTORY: EndpointMeta = EndpointMeta {
    name: "removeInventory",
    path: "/api/warehouse/inventory/remove",
    method: HttpMethod::Post,
    allowed_roles: MANAGERS,
    request_type: Some("InventoryChangeRequest"),
    response_type: Some("BasicResponse"),
    organization_scoped: true,
};

static GET_INVENTORY: EndpointMeta = EndpointMeta {
    name: "getInventory",
    path: "/api/warehouse/inventory/get",
    method: HttpMethod::Get,
    allowed_roles: MANAGERS,
    request_type: None,
    response_type: Some("GetInventoryResponse"),
    organization_scoped: true,
};

static GET_ALL_FORMS: EndpointMeta = EndpointMeta {
    name: "getAllForms",
    path: "/api/warehouse/forms",
    method: HttpMethod::Get,
    allowed_roles: MANAGERS,
    request_type: None,
    response_type: Some("GetAllFormsResponse"),
    organization_scoped: true,
};

static PUBLISH_PARTIAL_REPORT: EndpointMeta = EndpointMeta {
    name: "publishPartialReport",
    path: "/api/warehouse/reports/publish",
    method: HttpMethod::Post,
    allowed_roles: MANAGERS,
    request_type: Some("PublishPartialReportRequest"),
    response_type: Some("BasicResponse"),
    organization_scoped: true,
};

static GET_REPORTS: EndpointMeta = EndpointMeta {
    name: "getReports",
    path: "/api/warehouse/reports",
    method: HttpMethod::Get,
    allowed_roles: MANAGERS,
    request_type: None,
    response_type: Some("GetReportsResponse"),
    organization_scoped: true,
};

impl Endpoint {
    pub const ALL: [Endpoint; 18] = [
        Endpoint::GetUsers,
        Endpoint::SetUser,
        Endpoint::Start,
        Endpoint::RequestCheckOut,
        Endpoint::ApproveCheckOut,
        Endpoint::RejectCheckOut,
        Endpoint::RequestCheckIn,
        Endpoint::ApproveCheckIn,
        Endpoint::GetUserForms,
        Endpoint::GetUserInventory,
        Endpoint::GetProducts,
        Endpoint::SetProducts,
        Endpoint::AddInventory,
        Endpoint::RemoveInventory,
        Endpoint::GetInventory,
        Endpoint::GetAllForms,
        Endpoint::PublishPartialReport,
        Endpoint::GetReports,
    ];

    pub fn meta(self) -> &'static EndpointMeta {
        match self {
            Endpoint::GetUsers => &GET_USERS,
            Endpoint::SetUser => &SET_USER,
            Endpoint::Start => &START,
            Endpoint::RequestCheckOut => &REQUEST_CHECK_OUT,
            Endpoint::ApproveCheckOut => &APPROVE_CHECK_OUT,
            Endpoint::RejectCheckOut => &REJECT_CHECK_OUT,
            Endpoint::RequestCheckIn => &REQUEST_CHECK_IN,
            Endpoint::ApproveCheckIn => &APPROVE_CHECK_IN,
            Endpoint::GetUserForms => &GET_USER_FORMS,
            Endpoint::GetUserInventory => &GET_USER_INVENTORY,
            Endpoint::GetProducts => &GET_PRODUCTS,
            Endpoint::SetProducts => &SET_PRODUCTS,
            Endpoint::AddInventory => &ADD_INVENTORY,
            Endpoint::RemoveInventory => &REMOVE_INVENTORY,
            Endpoint::GetInventory => &GET_INVENTORY,
            Endpoint::GetAllForms => &GET_ALL_FORMS,
            Endpoint::PublishPartialReport => &PUBLISH_PARTIAL_REPORT,
            Endpoint::GetReports => &GET_REPORTS,
        }
    }

    pub fn name(self) -> &'static str {
        self.meta().name
    }

    /// Parse an operation name, e.g. from `EQUIP_TRACK_ENDPOINT`
    pub fn from_name(name: &str) -> Result<Endpoint, ContractError> {
        Endpoint::ALL
            .into_iter()
            .find(|e| e.name() == name)
            .ok_or_else(|| ContractError::UnknownOperation(name.to_string()))
    }

    /// Match an incoming request to an operation
    pub fn route(method: HttpMethod, path: &str) -> Option<Endpoint> {
        let path = path.trim_end_matches('/');
        Endpoint::ALL
            .into_iter()
            .find(|e| e.meta().method == method && e.meta().path == path)
    }
}

pub fn lookup(name: &str) -> Result<&'static EndpointMeta, ContractError> {
    Endpoint::from_name(name).map(Endpoint::meta)
}

pub fn is_authorized(meta: &EndpointMeta, role: UserRole) -> bool {
    meta.allowed_roles.contains(&role)
}

pub fn authorize(meta: &EndpointMeta, role: UserRole) -> Result<(), ContractError> {
    if is_authorized(meta, role) {
        Ok(())
    } else {
        Err(ContractError::RoleNotAllowed {
            operation: meta.name,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ROLES: [UserRole; 3] = [UserRole::Admin, UserRole::Customer, UserRole::WarehouseManager];

    #[test]
    fn test_every_endpoint_has_roles() {
        for endpoint in Endpoint::ALL {
            assert!(
                !endpoint.meta().allowed_roles.is_empty(),
                "{} has no allowed roles",
                endpoint.name()
            );
        }
    }

    #[test]
    fn test_authorization_is_set_membership() {
        for endpoint in Endpoint::ALL {
            let meta = endpoint.meta();
            for role in ROLES {
                assert_eq!(is_authorized(meta, role), meta.allowed_roles.contains(&role));
                assert_eq!(authorize(meta, role).is_ok(), is_authorized(meta, role));
            }
        }
    }

    #[test]
    fn test_names_and_routes_are_unique() {
        let names: HashSet<_> = Endpoint::ALL.iter().map(|e| e.name()).collect();
        assert_eq!(names.len(), Endpoint::ALL.len());

        let routes: HashSet<_> = Endpoint::ALL
            .iter()
            .map(|e| (e.meta().method, e.meta().path))
            .collect();
        assert_eq!(routes.len(), Endpoint::ALL.len());
    }

    #[test]
    fn test_lookup_and_route_agree() {
        for endpoint in Endpoint::ALL {
            let meta = lookup(endpoint.name()).unwrap();
            assert_eq!(Endpoint::route(meta.method, meta.path), Some(endpoint));
        }
    }

    #[test]
    fn test_documented_role_table() {
        assert_eq!(GET_USERS.allowed_roles, &[UserRole::Admin]);
        assert!(is_authorized(Endpoint::Start.meta(), UserRole::Customer));
        assert!(is_authorized(Endpoint::ApproveCheckOut.meta(), UserRole::WarehouseManager));
        assert!(!is_authorized(Endpoint::ApproveCheckOut.meta(), UserRole::Customer));
        assert!(is_authorized(Endpoint::RequestCheckIn.meta(), UserRole::Customer));
        assert!(!is_authorized(Endpoint::RequestCheckIn.meta(), UserRole::WarehouseManager));
        assert!(!is_authorized(Endpoint::GetInventory.meta(), UserRole::Customer));
    }

    #[test]
    fn test_unknown_operation_differs_from_forbidden() {
        let unknown = lookup("dropAllTables").unwrap_err();
        assert_eq!(unknown, ContractError::UnknownOperation("dropAllTables".to_string()));

        let forbidden = authorize(Endpoint::GetUsers.meta(), UserRole::Customer).unwrap_err();
        assert!(matches!(forbidden, ContractError::RoleNotAllowed { operation: "getUsers", .. }));
        assert_ne!(unknown, forbidden);
    }

    #[test]
    fn test_route_handles_method_and_trailing_slash() {
        assert_eq!(
            Endpoint::route(HttpMethod::Get, "/api/admin/users/"),
            Some(Endpoint::GetUsers)
        );
        assert_eq!(
            Endpoint::route(HttpMethod::Post, "/api/admin/users"),
            Some(Endpoint::SetUser)
        );
        assert_eq!(Endpoint::route(HttpMethod::Delete, "/api/admin/users"), None);
        assert_eq!(HttpMethod::parse("post"), Some(HttpMethod::Post));
    }
}
