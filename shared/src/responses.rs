use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::{Deserialize, Serialize};

/// Error codes the client maps to localized messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKey {
    // General
    GeneralError,
    InvalidRequest,
    NetworkError,
    UnknownEndpoint,
    // Auth
    Unauthorized,
    InvalidToken,
    TokenExpired,
    Forbidden,
    // Organization
    OrganizationIdRequired,
    OrganizationNotFound,
    // Forms
    FormIdRequired,
    FormNotFound,
    FormAlreadyProcessed,
    FormTypeMismatch,
    FormItemsRequired,
    // Inventory
    InvalidInventoryItem,
    InventoryProductMismatch,
    InsufficientInventory,
    UpiNotFound,
    DuplicateUpi,
    // Reports
    InvalidReport,
    // Users
    UserIdRequired,
    UserNotFound,
    // Products
    ProductNotFound,
    InvalidProduct,
}

/// Envelope embedded in every response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicResponse {
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_key: Option<ErrorKey>,
}

impl BasicResponse {
    pub fn ok() -> Self {
        Self {
            status: true,
            error: None,
            error_message: None,
            error_key: None,
        }
    }

    pub fn failed(error: &str, message: impl Into<String>, key: ErrorKey) -> Self {
        Self {
            status: false,
            error: Some(error.to_string()),
            error_message: Some(message.into()),
            error_key: Some(key),
        }
    }
}

impl Default for BasicResponse {
    fn default() -> Self {
        Self::ok()
    }
}

/// JSON response with the CORS headers API Gateway expects
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(body)?.into())
        .map_err(Box::new)?)
}

pub fn preflight_response() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET,POST,PUT,DELETE,OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type,Authorization")
        .body(Body::Empty)
        .map_err(Box::new)?)
}
