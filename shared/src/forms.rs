use crate::context::{ensure_same_organization, RequestContext};
use crate::contracts::{
    ApproveFormRequest, FormResponse, GetAllFormsResponse, GetUserFormsResponse,
    RejectFormRequest, RequestFormRequest,
};
use crate::dynamo::{self, form_sk, get_json, get_n, get_s, n, org_pk, s, Holder, Item};
use crate::error::ApiError;
use crate::inventory::{self, consolidate, remove_items, InventoryError};
use crate::responses::{BasicResponse, ErrorKey};
use crate::types::{FormStatus, FormType, InventoryForm, InventoryItem, ItemsByKey};
use crate::AppState;
use aws_sdk_dynamodb::types::{Put, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("a form needs at least one item")]
    NoItems,
    #[error("form {form_id} is already {status}")]
    AlreadyProcessed { form_id: String, status: FormStatus },
    #[error("form {form_id} is not a {expected:?} form")]
    WrongType { form_id: String, expected: FormType },
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

impl FormError {
    pub fn error_key(&self) -> ErrorKey {
        match self {
            FormError::NoItems => ErrorKey::FormItemsRequired,
            FormError::AlreadyProcessed { .. } => ErrorKey::FormAlreadyProcessed,
            FormError::WrongType { .. } => ErrorKey::FormTypeMismatch,
            FormError::Inventory(e) => e.error_key(),
        }
    }
}

fn type_str(form_type: FormType) -> &'static str {
    match form_type {
        FormType::CheckIn => "checkIn",
        FormType::CheckOut => "checkOut",
    }
}

fn parse_type(value: &str) -> Option<FormType> {
    match value {
        "checkIn" => Some(FormType::CheckIn),
        "checkOut" => Some(FormType::CheckOut),
        _ => None,
    }
}

fn parse_status(value: &str) -> Option<FormStatus> {
    match value {
        "pending" => Some(FormStatus::Pending),
        "approved" => Some(FormStatus::Approved),
        "rejected" => Some(FormStatus::Rejected),
        _ => None,
    }
}

impl InventoryForm {
    /// New pending form; duplicate product lines are merged
    pub fn request(
        form_type: FormType,
        organization_id: &str,
        user_id: &str,
        items: Vec<InventoryItem>,
        description: String,
        now: i64,
    ) -> Result<Self, FormError> {
        if items.is_empty() {
            return Err(FormError::NoItems);
        }
        let items = consolidate(items)?;

        Ok(InventoryForm {
            user_id: user_id.to_string(),
            organization_id: organization_id.to_string(),
            form_id: uuid::Uuid::new_v4().to_string(),
            form_type,
            status: FormStatus::Pending,
            items,
            description,
            created_at_timestamp: now,
            last_updated: now,
            approved_at_timestamp: None,
            approved_by_user_id: None,
            rejection_reason: None,
        })
    }

    fn ensure_pending(&self, expected: FormType) -> Result<(), FormError> {
        if self.form_type != expected {
            return Err(FormError::WrongType {
                form_id: self.form_id.clone(),
                expected,
            });
        }
        if self.status != FormStatus::Pending {
            return Err(FormError::AlreadyProcessed {
                form_id: self.form_id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn approve(&mut self, expected: FormType, approver: &str, now: i64) -> Result<(), FormError> {
        self.ensure_pending(expected)?;
        self.status = FormStatus::Approved;
        self.approved_at_timestamp = Some(now);
        self.approved_by_user_id = Some(approver.to_string());
        self.last_updated = now;
        Ok(())
    }

    pub fn reject(
        &mut self,
        expected: FormType,
        approver: &str,
        reason: &str,
        now: i64,
    ) -> Result<(), FormError> {
        self.ensure_pending(expected)?;
        self.status = FormStatus::Rejected;
        self.approved_by_user_id = Some(approver.to_string());
        self.rejection_reason = Some(reason.to_string());
        self.last_updated = now;
        Ok(())
    }
}

// ========== STORAGE ==========
fn form_to_record(form: &InventoryForm) -> Result<Item, ApiError> {
    let mut record = HashMap::new();
    record.insert("PK".to_string(), s(org_pk(&form.organization_id)));
    record.insert("SK".to_string(), s(form_sk(&form.user_id, &form.form_id)));
    record.insert("userID".to_string(), s(form.user_id.clone()));
    record.insert("organizationID".to_string(), s(form.organization_id.clone()));
    record.insert("formID".to_string(), s(form.form_id.clone()));
    record.insert("type".to_string(), s(type_str(form.form_type)));
    record.insert("status".to_string(), s(form.status.to_string()));
    record.insert("items".to_string(), s(serde_json::to_string(&form.items)?));
    record.insert("description".to_string(), s(form.description.clone()));
    record.insert("createdAtTimestamp".to_string(), n(form.created_at_timestamp));
    record.insert("lastUpdated".to_string(), n(form.last_updated));
    if let Some(ts) = form.approved_at_timestamp {
        record.insert("approvedAtTimestamp".to_string(), n(ts));
    }
    if let Some(by) = &form.approved_by_user_id {
        record.insert("approvedByUserId".to_string(), s(by.clone()));
    }
    if let Some(reason) = &form.rejection_reason {
        record.insert("rejectionReason".to_string(), s(reason.clone()));
    }
    Ok(record)
}

fn form_from_record(record: &Item) -> Option<InventoryForm> {
    Some(InventoryForm {
        user_id: get_s(record, "userID")?,
        organization_id: get_s(record, "organizationID")?,
        form_id: get_s(record, "formID")?,
        form_type: parse_type(&get_s(record, "type")?)?,
        status: parse_status(&get_s(record, "status")?)?,
        items: get_json(record, "items").unwrap_or_default(),
        description: get_s(record, "description").unwrap_or_default(),
        created_at_timestamp: get_n(record, "createdAtTimestamp").unwrap_or_default(),
        last_updated: get_n(record, "lastUpdated").unwrap_or_default(),
        approved_at_timestamp: get_n(record, "approvedAtTimestamp"),
        approved_by_user_id: get_s(record, "approvedByUserId"),
        rejection_reason: get_s(record, "rejectionReason"),
    })
}

fn already_processed(form_id: &str) -> ApiError {
    tracing::warn!("Form {} changed while it was being processed", form_id);
    ApiError::conflict(
        ErrorKey::FormAlreadyProcessed,
        format!("Form {} was already processed", form_id),
    )
}

/// Put of the updated form that only applies while the stored copy is still pending
fn pending_form_put(table_name: &str, form: &InventoryForm) -> Result<TransactWriteItem, ApiError> {
    let put = Put::builder()
        .table_name(table_name)
        .set_item(Some(form_to_record(form)?))
        .condition_expression("#status = :pending")
        .expression_attribute_names("#status", "status")
        .expression_attribute_values(":pending", s("pending"))
        .build()
        .map_err(|e| ApiError::Upstream(format!("Failed to build form write: {}", e)))?;
    Ok(TransactWriteItem::builder().put(put).build())
}

/// The form put is the first action of an approval; any other failure is stock
fn approval_conflict(form_id: &str, failed: &[usize]) -> ApiError {
    if failed.contains(&0) {
        already_processed(form_id)
    } else {
        inventory::stale_inventory()
    }
}

async fn put_form(
    client: &DynamoClient,
    table_name: &str,
    form: &InventoryForm,
    require_pending: bool,
) -> Result<(), ApiError> {
    let mut put = client
        .put_item()
        .table_name(table_name)
        .set_item(Some(form_to_record(form)?));
    if require_pending {
        put = put
            .condition_expression("#status = :pending")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":pending", s("pending"));
    }

    match put.send().await {
        Ok(_) => Ok(()),
        Err(e) => {
            let conditional_failed = e
                .as_service_error()
                .map(|se| se.is_conditional_check_failed_exception())
                .unwrap_or(false);
            if conditional_failed {
                Err(already_processed(&form.form_id))
            } else {
                Err(e.into())
            }
        }
    }
}

async fn load_form(
    client: &DynamoClient,
    table_name: &str,
    organization_id: &str,
    user_id: &str,
    form_id: &str,
) -> Result<InventoryForm, ApiError> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", s(org_pk(organization_id)))
        .key("SK", s(form_sk(user_id, form_id)))
        .send()
        .await?;

    result
        .item()
        .and_then(form_from_record)
        .ok_or_else(|| ApiError::not_found(ErrorKey::FormNotFound, format!("Form {} not found", form_id)))
}

fn require_ids(form_id: &str, user_id: &str) -> Result<(), ApiError> {
    if !dynamo::is_valid_key_part(form_id) {
        return Err(ApiError::validation(ErrorKey::FormIdRequired, "formID is required"));
    }
    if !dynamo::is_valid_key_part(user_id) {
        return Err(ApiError::validation(ErrorKey::UserIdRequired, "userID is required"));
    }
    Ok(())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ========== HANDLERS ==========
async fn request_form(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
    form_type: FormType,
) -> Result<FormResponse, ApiError> {
    let req: RequestFormRequest = serde_json::from_slice(body)?;
    ensure_same_organization(ctx, &req.organization_id)?;

    let form = InventoryForm::request(
        form_type,
        &req.organization_id,
        ctx.user_id(),
        req.items,
        req.description,
        now_millis(),
    )?;

    if form_type == FormType::CheckIn {
        // Only items the user currently holds can be returned
        let held = inventory::load_holder(
            &state.dynamo_client,
            &state.tables.inventory,
            &form.organization_id,
            &Holder::User(form.user_id.clone()),
        )
        .await?;
        remove_items(&held, &form.items).map_err(FormError::from)?;
    }

    put_form(&state.dynamo_client, &state.tables.forms, &form, false).await?;
    tracing::info!(
        "Form {} ({}) requested by {}",
        form.form_id,
        type_str(form_type),
        form.user_id
    );

    Ok(FormResponse {
        basic: BasicResponse::ok(),
        form,
    })
}

pub async fn request_check_out(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<FormResponse, ApiError> {
    request_form(state, ctx, body, FormType::CheckOut).await
}

pub async fn request_check_in(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<FormResponse, ApiError> {
    request_form(state, ctx, body, FormType::CheckIn).await
}

async fn approve_form(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
    form_type: FormType,
) -> Result<FormResponse, ApiError> {
    let req: ApproveFormRequest = serde_json::from_slice(body)?;
    ensure_same_organization(ctx, &req.organization_id)?;
    require_ids(&req.form_id, &req.user_id)?;

    let mut form = load_form(
        &state.dynamo_client,
        &state.tables.forms,
        &req.organization_id,
        &req.user_id,
        &req.form_id,
    )
    .await?;
    form.approve(form_type, ctx.user_id(), now_millis())?;

    let user = Holder::User(form.user_id.clone());
    let (from, to) = match form_type {
        FormType::CheckOut => (Holder::Warehouse, user),
        FormType::CheckIn => (user, Holder::Warehouse),
    };

    // The status change and the stock movement commit together or not at all
    let mut actions = vec![pending_form_put(&state.tables.forms, &form)?];
    actions.extend(
        inventory::transfer_actions(
            &state.dynamo_client,
            &state.tables.inventory,
            &form.organization_id,
            &from,
            &to,
            &form.items,
        )
        .await
        .map_err(|e| match e {
            ApiError::Inventory(inner) => ApiError::Form(FormError::Inventory(inner)),
            other => other,
        })?,
    );
    dynamo::transact(&state.dynamo_client, actions, |failed| {
        approval_conflict(&form.form_id, failed)
    })
    .await?;

    tracing::info!("Form {} approved by {}", form.form_id, ctx.user_id());

    Ok(FormResponse {
        basic: BasicResponse::ok(),
        form,
    })
}

pub async fn approve_check_out(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<FormResponse, ApiError> {
    approve_form(state, ctx, body, FormType::CheckOut).await
}

pub async fn approve_check_in(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<FormResponse, ApiError> {
    approve_form(state, ctx, body, FormType::CheckIn).await
}

pub async fn reject_check_out(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<FormResponse, ApiError> {
    let req: RejectFormRequest = serde_json::from_slice(body)?;
    ensure_same_organization(ctx, &req.organization_id)?;
    require_ids(&req.form_id, &req.user_id)?;

    let mut form = load_form(
        &state.dynamo_client,
        &state.tables.forms,
        &req.organization_id,
        &req.user_id,
        &req.form_id,
    )
    .await?;
    form.reject(FormType::CheckOut, ctx.user_id(), &req.reason, now_millis())?;
    put_form(&state.dynamo_client, &state.tables.forms, &form, true).await?;

    tracing::info!("Form {} rejected by {}", form.form_id, ctx.user_id());
    Ok(FormResponse {
        basic: BasicResponse::ok(),
        form,
    })
}

pub async fn get_user_forms(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<GetUserFormsResponse, ApiError> {
    let organization_id = ctx.organization()?;
    let records = dynamo::query_prefix(
        &state.dynamo_client,
        &state.tables.forms,
        &org_pk(organization_id),
        &format!("FORM#{}#", ctx.user_id()),
    )
    .await?;

    let mut forms: Vec<InventoryForm> = records.iter().filter_map(form_from_record).collect();
    forms.sort_by(|a, b| b.created_at_timestamp.cmp(&a.created_at_timestamp));

    Ok(GetUserFormsResponse {
        basic: BasicResponse::ok(),
        forms,
    })
}

pub fn group_by_user(forms: Vec<InventoryForm>) -> ItemsByKey<InventoryForm> {
    let mut grouped: ItemsByKey<InventoryForm> = HashMap::new();
    for form in forms {
        grouped.entry(form.user_id.clone()).or_default().push(form);
    }
    grouped
}

pub async fn get_all_forms(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<GetAllFormsResponse, ApiError> {
    let organization_id = ctx.organization()?;
    let records = dynamo::query_prefix(
        &state.dynamo_client,
        &state.tables.forms,
        &org_pk(organization_id),
        "FORM#",
    )
    .await?;

    let forms = records.iter().filter_map(form_from_record).collect();
    Ok(GetAllFormsResponse {
        basic: BasicResponse::ok(),
        forms_by_user: group_by_user(forms),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: &str, quantity: u32) -> InventoryItem {
        InventoryItem {
            product_id: product.to_string(),
            quantity,
            upis: None,
        }
    }

    fn pending(form_type: FormType) -> InventoryForm {
        InventoryForm::request(
            form_type,
            "o1",
            "u1",
            vec![item("p1", 1), item("p1", 2)],
            "field trip".to_string(),
            100,
        )
        .unwrap()
    }

    #[test]
    fn test_request_merges_items() {
        let form = pending(FormType::CheckOut);
        assert_eq!(form.status, FormStatus::Pending);
        assert_eq!(form.items, vec![item("p1", 3)]);
        assert!(!form.form_id.is_empty());
    }

    #[test]
    fn test_request_needs_items() {
        let err = InventoryForm::request(FormType::CheckIn, "o1", "u1", vec![], String::new(), 0)
            .unwrap_err();
        assert_eq!(err, FormError::NoItems);
        assert_eq!(err.error_key(), ErrorKey::FormItemsRequired);
    }

    #[test]
    fn test_approve_then_reject_fails() {
        let mut form = pending(FormType::CheckOut);
        form.approve(FormType::CheckOut, "manager", 200).unwrap();
        assert_eq!(form.status, FormStatus::Approved);
        assert_eq!(form.approved_at_timestamp, Some(200));
        assert_eq!(form.approved_by_user_id.as_deref(), Some("manager"));

        let err = form.reject(FormType::CheckOut, "manager", "late", 300).unwrap_err();
        assert!(matches!(
            err,
            FormError::AlreadyProcessed {
                status: FormStatus::Approved,
                ..
            }
        ));
        assert_eq!(form.last_updated, 200);
    }

    #[test]
    fn test_reject_records_reason() {
        let mut form = pending(FormType::CheckOut);
        form.reject(FormType::CheckOut, "manager", "out of stock", 250).unwrap();
        assert_eq!(form.status, FormStatus::Rejected);
        assert_eq!(form.rejection_reason.as_deref(), Some("out of stock"));
        assert_eq!(form.approved_at_timestamp, None);
    }

    #[test]
    fn test_wrong_form_type() {
        let mut form = pending(FormType::CheckIn);
        let err = form.approve(FormType::CheckOut, "manager", 200).unwrap_err();
        assert!(matches!(err, FormError::WrongType { .. }));
        assert_eq!(form.status, FormStatus::Pending);
    }

    #[test]
    fn test_record_round_trip() {
        let mut form = pending(FormType::CheckOut);
        form.reject(FormType::CheckOut, "m1", "no", 300).unwrap();
        let record = form_to_record(&form).unwrap();
        assert_eq!(get_s(&record, "SK"), Some(format!("FORM#u1#{}", form.form_id)));
        assert_eq!(form_from_record(&record), Some(form));
    }

    #[test]
    fn test_group_by_user() {
        let mut other = pending(FormType::CheckIn);
        other.user_id = "u2".to_string();
        let grouped = group_by_user(vec![pending(FormType::CheckOut), other, pending(FormType::CheckIn)]);
        assert_eq!(grouped["u1"].len(), 2);
        assert_eq!(grouped["u2"].len(), 1);
    }

    #[test]
    fn test_require_ids() {
        assert_eq!(
            require_ids("", "u1").unwrap_err().error_key(),
            ErrorKey::FormIdRequired
        );
        assert_eq!(
            require_ids("f1", "").unwrap_err().error_key(),
            ErrorKey::UserIdRequired
        );
        assert!(require_ids("f1", "u1").is_ok());
        assert_eq!(
            require_ids("f1", "u1#x").unwrap_err().error_key(),
            ErrorKey::UserIdRequired
        );
        assert_eq!(
            require_ids("f1#x", "u1").unwrap_err().error_key(),
            ErrorKey::FormIdRequired
        );
    }

    #[test]
    fn test_approval_write_requires_pending_status() {
        let mut form = pending(FormType::CheckOut);
        form.approve(FormType::CheckOut, "m1", 2).unwrap();

        let action = pending_form_put("forms", &form).unwrap();
        let put = action.put().unwrap();
        assert_eq!(put.table_name(), "forms");
        assert_eq!(put.condition_expression(), Some("#status = :pending"));
        assert_eq!(get_s(put.item(), "status").as_deref(), Some("approved"));
        assert_eq!(
            put.expression_attribute_values()
                .and_then(|v| v.get(":pending"))
                .and_then(|v| v.as_s().ok())
                .map(|v| v.as_str()),
            Some("pending")
        );
    }

    #[test]
    fn test_approval_conflicts_are_told_apart() {
        let form = approval_conflict("f1", &[0]);
        assert_eq!(form.error_key(), ErrorKey::FormAlreadyProcessed);
        assert_eq!(form.status_code(), lambda_http::http::StatusCode::CONFLICT);

        let stock = approval_conflict("f1", &[2]);
        assert_eq!(stock.error_key(), ErrorKey::GeneralError);
        assert_eq!(stock.status_code(), lambda_http::http::StatusCode::CONFLICT);
    }
}
