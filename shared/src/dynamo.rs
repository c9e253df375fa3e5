//! Table shapes and attribute helpers shared by the handlers and the deployment tooling.

use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, TransactWriteItem, WriteRequest};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

pub type Item = HashMap<String, AttributeValue>;

pub const PARTITION_KEY: &str = "PK";
pub const SORT_KEY: &str = "SK";

/// Key layout of one table; every table uses string `PK`/`SK` keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub logical_name: &'static str,
    pub partition_key: &'static str,
    pub sort_key: &'static str,
}

impl TableSpec {
    pub fn physical_name(&self, prefix: &str, stage: &str) -> String {
        format!("{}-{}-{}", prefix, self.logical_name, stage)
    }
}

pub const USERS_TABLE: TableSpec = TableSpec {
    logical_name: "users",
    partition_key: PARTITION_KEY,
    sort_key: SORT_KEY,
};

pub const INVENTORY_TABLE: TableSpec = TableSpec {
    logical_name: "inventory",
    partition_key: PARTITION_KEY,
    sort_key: SORT_KEY,
};

pub const FORMS_TABLE: TableSpec = TableSpec {
    logical_name: "forms",
    partition_key: PARTITION_KEY,
    sort_key: SORT_KEY,
};

pub const REPORTS_TABLE: TableSpec = TableSpec {
    logical_name: "reports",
    partition_key: PARTITION_KEY,
    sort_key: SORT_KEY,
};

pub const ALL_TABLES: [TableSpec; 4] = [USERS_TABLE, INVENTORY_TABLE, FORMS_TABLE, REPORTS_TABLE];

pub const DEFAULT_TABLE_PREFIX: &str = "equip-track";

/// Physical table names for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub users: String,
    pub inventory: String,
    pub forms: String,
    pub reports: String,
}

impl Tables {
    pub fn new(prefix: &str, stage: &str) -> Self {
        Self {
            users: USERS_TABLE.physical_name(prefix, stage),
            inventory: INVENTORY_TABLE.physical_name(prefix, stage),
            forms: FORMS_TABLE.physical_name(prefix, stage),
            reports: REPORTS_TABLE.physical_name(prefix, stage),
        }
    }

    pub fn from_env() -> Self {
        let prefix =
            std::env::var("TABLE_PREFIX").unwrap_or_else(|_| DEFAULT_TABLE_PREFIX.to_string());
        let stage = std::env::var("STAGE").unwrap_or_else(|_| "dev".to_string());
        Self::new(&prefix, &stage)
    }
}

// ========== KEYS ==========
/// Joins the parts of composite sort keys
pub const KEY_SEPARATOR: char = '#';

/// Ids are embedded in composite keys, so they must be non-empty and separator-free
pub fn is_valid_key_part(id: &str) -> bool {
    !id.trim().is_empty() && !id.contains(KEY_SEPARATOR)
}

pub fn user_pk(user_id: &str) -> String {
    format!("USER#{}", user_id)
}

pub fn org_pk(organization_id: &str) -> String {
    format!("ORG#{}", organization_id)
}

pub const METADATA_SK: &str = "METADATA";

pub fn product_sk(product_id: &str) -> String {
    format!("PRODUCT#{}", product_id)
}

/// Owner of a set of inventory lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Holder {
    Warehouse,
    User(String),
}

impl Holder {
    pub fn sk_prefix(&self) -> String {
        match self {
            Holder::Warehouse => "ITEM#WAREHOUSE#".to_string(),
            Holder::User(id) => format!("ITEM#USER#{}#", id),
        }
    }

    pub fn item_sk(&self, product_id: &str) -> String {
        format!("{}{}", self.sk_prefix(), product_id)
    }
}

pub const ALL_USER_ITEMS_PREFIX: &str = "ITEM#USER#";

pub fn form_sk(user_id: &str, form_id: &str) -> String {
    format!("FORM#{}#{}", user_id, form_id)
}

pub fn report_sk(date: &str, product_id: &str, upi: &str) -> String {
    format!("REPORT#{}#{}#{}", date, product_id, upi)
}

// ========== ATTRIBUTES ==========
pub fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

pub fn n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

pub fn get_s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).map(|s| s.to_string())
}

pub fn get_n<T: std::str::FromStr>(item: &Item, key: &str) -> Option<T> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
}

pub fn get_bool(item: &Item, key: &str) -> Option<bool> {
    item.get(key).and_then(|v| v.as_bool().ok()).copied()
}

/// Structured fields are stored as JSON strings
pub fn get_json<T: DeserializeOwned>(item: &Item, key: &str) -> Option<T> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .and_then(|raw| serde_json::from_str(raw).ok())
}

// ========== WRITES ==========
/// DynamoDB accepts at most 25 writes per batch
const BATCH_SIZE: usize = 25;
/// Sends of one batch before unprocessed writes become an error
const BATCH_ATTEMPTS: u32 = 5;

/// Pause before resending unprocessed writes: 50ms, 100ms, 200ms, ...
fn batch_retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(50u64 << attempt.saturating_sub(1).min(6))
}

/// Writes in batches of 25, resending whatever DynamoDB leaves unprocessed
pub async fn write_batches(
    client: &aws_sdk_dynamodb::Client,
    table_name: &str,
    writes: Vec<WriteRequest>,
) -> Result<(), crate::error::ApiError> {
    for chunk in writes.chunks(BATCH_SIZE) {
        let mut pending = chunk.to_vec();
        let mut attempt = 0;
        while !pending.is_empty() {
            if attempt == BATCH_ATTEMPTS {
                tracing::error!(
                    "{} writes to {} still unprocessed after {} attempts",
                    pending.len(),
                    table_name,
                    attempt
                );
                return Err(crate::error::ApiError::Upstream(format!(
                    "{} writes were not processed",
                    pending.len()
                )));
            }
            if attempt > 0 {
                tracing::warn!("Resending {} unprocessed writes to {}", pending.len(), table_name);
                tokio::time::sleep(batch_retry_delay(attempt)).await;
            }

            let resp = client
                .batch_write_item()
                .request_items(table_name, pending)
                .send()
                .await?;
            pending = resp
                .unprocessed_items
                .and_then(|mut unprocessed| unprocessed.remove(table_name))
                .unwrap_or_default();
            attempt += 1;
        }
    }
    Ok(())
}

/// DynamoDB accepts at most 100 actions per transaction
pub const TRANSACTION_LIMIT: usize = 100;

/// Indexes of the actions whose condition failed when a transaction was cancelled
pub fn failed_conditions<R>(err: &SdkError<TransactWriteItemsError, R>) -> Option<Vec<usize>> {
    match err.as_service_error()? {
        TransactWriteItemsError::TransactionCanceledException(cancelled) => Some(
            cancelled
                .cancellation_reasons()
                .iter()
                .enumerate()
                .filter(|(_, reason)| reason.code() == Some("ConditionalCheckFailed"))
                .map(|(index, _)| index)
                .collect(),
        ),
        _ => None,
    }
}

/// Apply all actions or none; `on_conflict` turns failed conditions into an error
pub async fn transact<F>(
    client: &aws_sdk_dynamodb::Client,
    actions: Vec<TransactWriteItem>,
    on_conflict: F,
) -> Result<(), crate::error::ApiError>
where
    F: FnOnce(&[usize]) -> crate::error::ApiError,
{
    if actions.is_empty() {
        return Ok(());
    }
    if actions.len() > TRANSACTION_LIMIT {
        return Err(crate::error::ApiError::validation(
            crate::responses::ErrorKey::InvalidRequest,
            format!(
                "A single change may touch at most {} records ({} requested)",
                TRANSACTION_LIMIT,
                actions.len()
            ),
        ));
    }

    match client
        .transact_write_items()
        .set_transact_items(Some(actions))
        .send()
        .await
    {
        Ok(_) => Ok(()),
        Err(e) => match failed_conditions(&e) {
            Some(failed) if !failed.is_empty() => Err(on_conflict(&failed)),
            _ => Err(e.into()),
        },
    }
}

/// Query every item under `pk` whose sort key starts with `sk_prefix`, following pagination
pub async fn query_prefix(
    client: &aws_sdk_dynamodb::Client,
    table_name: &str,
    pk: &str,
    sk_prefix: &str,
) -> Result<Vec<Item>, crate::error::ApiError> {
    let mut items = Vec::new();
    let mut start_key: Option<Item> = None;
    loop {
        let resp = client
            .query()
            .table_name(table_name)
            .key_condition_expression("PK = :pk AND begins_with(SK, :prefix)")
            .expression_attribute_values(":pk", s(pk))
            .expression_attribute_values(":prefix", s(sk_prefix))
            .set_exclusive_start_key(start_key.take())
            .send()
            .await?;

        items.extend(resp.items().iter().cloned());

        match resp.last_evaluated_key() {
            Some(key) if !key.is_empty() => start_key = Some(key.clone()),
            _ => break,
        }
    }
    Ok(items)
}
