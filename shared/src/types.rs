use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// String-keyed groups of values (reports by date, forms by user, items by user).
/// Key order carries no meaning.
pub type ItemsByKey<T> = HashMap<String, Vec<T>>;

// ========== ROLES ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserRole {
    Admin,
    Customer,
    WarehouseManager,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Customer => "customer",
            UserRole::WarehouseManager => "warehouseManager",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(UserRole::Admin),
            "customer" => Some(UserRole::Customer),
            "warehouseManager" => Some(UserRole::WarehouseManager),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========== USER ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserState {
    #[default]
    Active,
    Invited,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub state: UserState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInOrganization {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "organizationID")]
    pub organization_id: String,
    pub role: UserRole,
}

// ========== ORGANIZATION ==========
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

// ========== PRODUCT ==========
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Units are individually tracked by UPI
    #[serde(default)]
    pub has_upi: bool,
}

// ========== INVENTORY ==========
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    #[serde(rename = "productID")]
    pub product_id: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upis: Option<Vec<String>>,
}

// ========== FORMS ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormType {
    CheckIn,
    CheckOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for FormStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FormStatus::Pending => "pending",
            FormStatus::Approved => "approved",
            FormStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryForm {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "organizationID")]
    pub organization_id: String,
    #[serde(rename = "formID")]
    pub form_id: String,
    #[serde(rename = "type")]
    pub form_type: FormType,
    pub status: FormStatus,
    pub items: Vec<InventoryItem>,
    #[serde(default)]
    pub description: String,
    pub created_at_timestamp: i64,
    pub last_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

// ========== REPORTS ==========
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReport {
    #[serde(rename = "productID")]
    pub product_id: String,
    pub upi: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<String>,
    /// YYYY-MM-DD, assigned on publish
    #[serde(default)]
    pub report_date: String,
}
