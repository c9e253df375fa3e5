use crate::auth::AuthError;
use crate::endpoints::ContractError;
use crate::forms::FormError;
use crate::inventory::InventoryError;
use crate::responses::{BasicResponse, ErrorKey};
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use lambda_http::http::StatusCode;

/// Every failure an API operation can report to the client
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{message}")]
    Validation { key: ErrorKey, message: String },
    #[error("{message}")]
    NotFound { key: ErrorKey, message: String },
    /// Stored state moved under the request; retrying may succeed
    #[error("{message}")]
    Conflict { key: ErrorKey, message: String },
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl ApiError {
    pub fn validation(key: ErrorKey, message: impl Into<String>) -> Self {
        ApiError::Validation {
            key,
            message: message.into(),
        }
    }

    pub fn not_found(key: ErrorKey, message: impl Into<String>) -> Self {
        ApiError::NotFound {
            key,
            message: message.into(),
        }
    }

    pub fn conflict(key: ErrorKey, message: impl Into<String>) -> Self {
        ApiError::Conflict {
            key,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Contract(ContractError::UnknownOperation(_)) => StatusCode::NOT_FOUND,
            ApiError::Contract(ContractError::RoleNotAllowed { .. }) => StatusCode::FORBIDDEN,
            ApiError::Auth(AuthError::NoMembership(_)) => StatusCode::FORBIDDEN,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Inventory(_) => StatusCode::BAD_REQUEST,
            ApiError::Form(FormError::AlreadyProcessed { .. }) => StatusCode::CONFLICT,
            ApiError::Form(FormError::Inventory(InventoryError::Insufficient { .. })) => {
                StatusCode::CONFLICT
            }
            ApiError::Form(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_key(&self) -> ErrorKey {
        match self {
            ApiError::Contract(ContractError::UnknownOperation(_)) => ErrorKey::UnknownEndpoint,
            ApiError::Contract(ContractError::RoleNotAllowed { .. }) => ErrorKey::Forbidden,
            ApiError::Auth(e) => e.error_key(),
            ApiError::Validation { key, .. }
            | ApiError::NotFound { key, .. }
            | ApiError::Conflict { key, .. } => *key,
            ApiError::Inventory(e) => e.error_key(),
            ApiError::Form(e) => e.error_key(),
            ApiError::Upstream(_) => ErrorKey::NetworkError,
        }
    }

    /// Short machine-readable label for the `error` field
    pub fn label(&self) -> &'static str {
        match self {
            ApiError::Contract(ContractError::UnknownOperation(_)) => "NotFound",
            ApiError::Contract(ContractError::RoleNotAllowed { .. }) => "Forbidden",
            ApiError::Auth(AuthError::NoMembership(_)) => "Forbidden",
            ApiError::Auth(_) => "Unauthorized",
            ApiError::Validation { .. } => "InvalidRequest",
            ApiError::NotFound { .. } => "NotFound",
            ApiError::Conflict { .. } => "Conflict",
            ApiError::Inventory(_) => "InvalidInventory",
            ApiError::Form(_) => "InvalidForm",
            ApiError::Upstream(_) => "UpstreamError",
        }
    }

    pub fn to_response(&self) -> BasicResponse {
        // Upstream details stay in the logs
        let message = match self {
            ApiError::Upstream(_) => "Request failed, please try again".to_string(),
            other => other.to_string(),
        };
        BasicResponse::failed(self.label(), message, self.error_key())
    }
}

impl<E, R> From<SdkError<E, R>> for ApiError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    fn from(err: SdkError<E, R>) -> Self {
        ApiError::Upstream(DisplayErrorContext(&err).to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::validation(ErrorKey::InvalidRequest, format!("Invalid request body: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::{authorize, lookup, Endpoint};
    use crate::types::UserRole;

    #[test]
    fn test_unknown_endpoint_and_forbidden_map_differently() {
        let unknown: ApiError = lookup("nope").unwrap_err().into();
        let forbidden: ApiError = authorize(Endpoint::GetUsers.meta(), UserRole::Customer)
            .unwrap_err()
            .into();

        assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(unknown.error_key(), ErrorKey::UnknownEndpoint);
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(forbidden.error_key(), ErrorKey::Forbidden);
    }

    #[test]
    fn test_validation_error_keeps_key() {
        let err = ApiError::validation(ErrorKey::FormIdRequired, "formID is required");
        let resp = err.to_response();
        assert!(!resp.status);
        assert_eq!(resp.error_key, Some(ErrorKey::FormIdRequired));
        assert_eq!(resp.error_message.as_deref(), Some("formID is required"));
    }

    #[test]
    fn test_upstream_message_is_generic() {
        let resp = ApiError::Upstream("ResourceNotFoundException: table".to_string()).to_response();
        assert_eq!(resp.error_key, Some(ErrorKey::NetworkError));
        assert!(!resp.error_message.unwrap().contains("ResourceNotFound"));
    }

    #[test]
    fn test_conflict_is_409_with_its_key() {
        let err = ApiError::conflict(ErrorKey::FormAlreadyProcessed, "form f1 is already approved");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_key(), ErrorKey::FormAlreadyProcessed);
        assert_eq!(err.to_response().error.as_deref(), Some("Conflict"));
    }

    #[test]
    fn test_bad_json_is_invalid_request() {
        let err: ApiError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.error_key(), ErrorKey::InvalidRequest);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
