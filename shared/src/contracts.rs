//! Request and response bodies for each operation in [`crate::endpoints`].

use crate::responses::BasicResponse;
use crate::types::{
    InventoryForm, InventoryItem, ItemReport, ItemsByKey, Organization, Product, User,
    UserInOrganization, UserRole,
};
use serde::{Deserialize, Serialize};

// ========== USERS ==========
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationUser {
    pub user: User,
    pub role: UserRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetUsersResponse {
    #[serde(flatten)]
    pub basic: BasicResponse,
    pub users: Vec<OrganizationUser>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetUserRequest {
    #[serde(rename = "organizationID")]
    pub organization_id: String,
    pub user: User,
    pub role: UserRole,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    #[serde(flatten)]
    pub basic: BasicResponse,
    pub user: User,
    pub user_in_organizations: Vec<UserInOrganization>,
    pub organizations: Vec<Organization>,
}

// ========== FORMS ==========
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestFormRequest {
    #[serde(rename = "organizationID")]
    pub organization_id: String,
    pub items: Vec<InventoryItem>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveFormRequest {
    #[serde(rename = "organizationID")]
    pub organization_id: String,
    #[serde(rename = "formID", default)]
    pub form_id: String,
    #[serde(rename = "userID", default)]
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RejectFormRequest {
    #[serde(rename = "organizationID")]
    pub organization_id: String,
    #[serde(rename = "formID", default)]
    pub form_id: String,
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FormResponse {
    #[serde(flatten)]
    pub basic: BasicResponse,
    pub form: InventoryForm,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetUserFormsResponse {
    #[serde(flatten)]
    pub basic: BasicResponse,
    pub forms: Vec<InventoryForm>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAllFormsResponse {
    #[serde(flatten)]
    pub basic: BasicResponse,
    pub forms_by_user: ItemsByKey<InventoryForm>,
}

// ========== PRODUCTS ==========
#[derive(Debug, Serialize, Deserialize)]
pub struct SetProductsRequest {
    #[serde(rename = "organizationID")]
    pub organization_id: String,
    pub products: Vec<Product>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetProductsResponse {
    #[serde(flatten)]
    pub basic: BasicResponse,
    pub products: Vec<Product>,
}

// ========== INVENTORY ==========
#[derive(Debug, Serialize, Deserialize)]
pub struct InventoryChangeRequest {
    #[serde(rename = "organizationID")]
    pub organization_id: String,
    pub items: Vec<InventoryItem>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInventoryResponse {
    #[serde(flatten)]
    pub basic: BasicResponse,
    pub warehouse_items: Vec<InventoryItem>,
    pub users_items: ItemsByKey<InventoryItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetUserInventoryResponse {
    #[serde(flatten)]
    pub basic: BasicResponse,
    pub items: Vec<InventoryItem>,
}

// ========== REPORTS ==========
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishPartialReportRequest {
    #[serde(rename = "organizationID")]
    pub organization_id: String,
    pub items: Vec<ItemReport>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetReportsResponse {
    #[serde(flatten)]
    pub basic: BasicResponse,
    pub reports_by_date: ItemsByKey<ItemReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_flattens_envelope() {
        let resp = GetUserInventoryResponse {
            basic: BasicResponse::ok(),
            items: vec![],
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, serde_json::json!({"status": true, "items": []}));
    }

    #[test]
    fn test_approve_request_parses_contract_names() {
        let req: ApproveFormRequest = serde_json::from_str(
            r#"{"organizationID":"o1","formID":"f1","userID":"u1"}"#,
        )
        .unwrap();
        assert_eq!(req.form_id, "f1");
        assert_eq!(req.user_id, "u1");

        let missing: ApproveFormRequest =
            serde_json::from_str(r#"{"organizationID":"o1"}"#).unwrap();
        assert!(missing.form_id.is_empty());
    }
}
