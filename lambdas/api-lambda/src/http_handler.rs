use equip_track_shared::{
    auth,
    context::RequestContext,
    dynamo,
    endpoints::{authorize, ContractError, Endpoint, HttpMethod},
    error::ApiError,
    forms, inventory, products, reports,
    responses::{json_response, preflight_response, ErrorKey},
    users, AppState,
};
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Main Lambda handler - routes requests through the endpoint registry
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
    only: Option<Endpoint>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    tracing::info!("API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if *method == Method::OPTIONS {
        return preflight_response();
    }

    match handle(&event, &state, only).await {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(e) => {
            match &e {
                ApiError::Upstream(detail) => tracing::error!("{} {} failed: {}", method, path, detail),
                other => tracing::warn!("{} {} rejected: {}", method, path, other),
            }
            json_response(e.status_code(), &e.to_response())
        }
    }
}

async fn handle(
    event: &Request,
    state: &AppState,
    only: Option<Endpoint>,
) -> Result<serde_json::Value, ApiError> {
    let path = event.uri().path();
    let endpoint = HttpMethod::parse(event.method().as_str())
        .and_then(|m| Endpoint::route(m, path))
        .filter(|e| only.map_or(true, |o| o == *e))
        .ok_or_else(|| ContractError::UnknownOperation(format!("{} {}", event.method(), path)))?;
    let meta = endpoint.meta();

    let header = event
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok());
    let session = auth::authenticate(header, &state.jwt_secret, chrono::Utc::now().timestamp())?;

    let query = query_params(event);
    let body: &[u8] = event.body();

    let (organization_id, role) = if meta.organization_scoped {
        let organization_id = resolve_organization(&query, body)?;
        let role = session.role_in(&organization_id)?;
        authorize(meta, role)?;
        (Some(organization_id), Some(role))
    } else {
        (None, None)
    };

    tracing::info!(
        "{} called by {} ({:?})",
        endpoint.name(),
        session.user_id,
        role
    );

    let ctx = RequestContext {
        session,
        organization_id,
        role,
        query,
    };
    dispatch(endpoint, state, &ctx, body).await
}

async fn dispatch(
    endpoint: Endpoint,
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<serde_json::Value, ApiError> {
    match endpoint {
        Endpoint::GetUsers => to_json(users::get_users(state, ctx).await?),
        Endpoint::SetUser => to_json(users::set_user(state, ctx, body).await?),
        Endpoint::Start => to_json(users::start(state, ctx).await?),
        Endpoint::RequestCheckOut => to_json(forms::request_check_out(state, ctx, body).await?),
        Endpoint::ApproveCheckOut => to_json(forms::approve_check_out(state, ctx, body).await?),
        Endpoint::RejectCheckOut => to_json(forms::reject_check_out(state, ctx, body).await?),
        Endpoint::RequestCheckIn => to_json(forms::request_check_in(state, ctx, body).await?),
        Endpoint::ApproveCheckIn => to_json(forms::approve_check_in(state, ctx, body).await?),
        Endpoint::GetUserForms => to_json(forms::get_user_forms(state, ctx).await?),
        Endpoint::GetAllForms => to_json(forms::get_all_forms(state, ctx).await?),
        Endpoint::GetUserInventory => to_json(inventory::get_user_inventory(state, ctx).await?),
        Endpoint::GetProducts => to_json(products::get_products(state, ctx).await?),
        Endpoint::SetProducts => to_json(products::set_products(state, ctx, body).await?),
        Endpoint::AddInventory => to_json(inventory::add_inventory(state, ctx, body).await?),
        Endpoint::RemoveInventory => to_json(inventory::remove_inventory(state, ctx, body).await?),
        Endpoint::GetInventory => to_json(inventory::get_inventory(state, ctx).await?),
        Endpoint::PublishPartialReport => {
            to_json(reports::publish_partial_report(state, ctx, body).await?)
        }
        Endpoint::GetReports => to_json(reports::get_reports(state, ctx).await?),
    }
}

fn to_json<T: Serialize>(response: T) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(response)
        .map_err(|e| ApiError::Upstream(format!("Failed to serialize response: {}", e)))
}

fn query_params(event: &Request) -> HashMap<String, String> {
    event
        .query_string_parameters_ref()
        .map(|params| {
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Deserialize)]
struct OrganizationScoped {
    #[serde(rename = "organizationID")]
    organization_id: Option<String>,
}

/// `organizationId` query parameter, else `organizationID` in the JSON body
fn resolve_organization(query: &HashMap<String, String>, body: &[u8]) -> Result<String, ApiError> {
    let organization_id = query
        .get("organizationId")
        .filter(|org| !org.is_empty())
        .cloned()
        .or_else(|| {
            serde_json::from_slice::<OrganizationScoped>(body)
                .ok()
                .and_then(|scoped| scoped.organization_id)
                .filter(|org| !org.is_empty())
        })
        .ok_or_else(|| {
            ApiError::validation(ErrorKey::OrganizationIdRequired, "organizationID is required")
        })?;
    if !dynamo::is_valid_key_part(&organization_id) {
        return Err(ApiError::validation(
            ErrorKey::OrganizationIdRequired,
            "organizationID must not contain '#'",
        ));
    }
    Ok(organization_id)
}
