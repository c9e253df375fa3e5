use crate::context::{ensure_same_organization, RequestContext};
use crate::contracts::{GetInventoryResponse, GetUserInventoryResponse, InventoryChangeRequest};
use crate::dynamo::{self, get_json, get_n, get_s, n, org_pk, s, Holder, Item};
use crate::error::ApiError;
use crate::products;
use crate::responses::{BasicResponse, ErrorKey};
use crate::types::{InventoryItem, ItemsByKey, Product};
use crate::AppState;
use aws_sdk_dynamodb::types::{Delete, Put, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InventoryError {
    #[error("cannot merge items of different products ({left} and {right})")]
    ProductMismatch { left: String, right: String },
    #[error("invalid item for product {product}: {reason}")]
    InvalidItem { product: String, reason: String },
    #[error("UPI {upi} appears more than once for product {product}")]
    DuplicateUpi { product: String, upi: String },
    #[error("not enough of product {product}: {available} available, {requested} requested")]
    Insufficient {
        product: String,
        available: u32,
        requested: u32,
    },
    #[error("UPI {upi} of product {product} is not held")]
    UpiNotFound { product: String, upi: String },
    #[error("unknown product {0}")]
    UnknownProduct(String),
}

impl InventoryError {
    pub fn error_key(&self) -> ErrorKey {
        match self {
            InventoryError::ProductMismatch { .. } => ErrorKey::InventoryProductMismatch,
            InventoryError::InvalidItem { .. } => ErrorKey::InvalidInventoryItem,
            InventoryError::DuplicateUpi { .. } => ErrorKey::DuplicateUpi,
            InventoryError::Insufficient { .. } => ErrorKey::InsufficientInventory,
            InventoryError::UpiNotFound { .. } => ErrorKey::UpiNotFound,
            InventoryError::UnknownProduct(_) => ErrorKey::ProductNotFound,
        }
    }
}

impl InventoryItem {
    /// Combine two lines of the same product
    pub fn merge(&self, other: &InventoryItem) -> Result<InventoryItem, InventoryError> {
        if self.product_id != other.product_id {
            return Err(InventoryError::ProductMismatch {
                left: self.product_id.clone(),
                right: other.product_id.clone(),
            });
        }

        let upis = match (&self.upis, &other.upis) {
            (None, None) => None,
            (left, right) => {
                let mut all = left.clone().unwrap_or_default();
                all.extend(right.iter().flatten().cloned());
                Some(all)
            }
        };

        let quantity = self
            .quantity
            .checked_add(other.quantity)
            .ok_or_else(|| InventoryError::InvalidItem {
                product: self.product_id.clone(),
                reason: "quantity overflow".to_string(),
            })?;

        Ok(InventoryItem {
            product_id: self.product_id.clone(),
            quantity,
            upis,
        })
    }

    pub fn validate(&self) -> Result<(), InventoryError> {
        let invalid = |reason: &str| InventoryError::InvalidItem {
            product: self.product_id.clone(),
            reason: reason.to_string(),
        };

        if self.product_id.is_empty() {
            return Err(invalid("productID is required"));
        }
        if !dynamo::is_valid_key_part(&self.product_id) {
            return Err(invalid("productID must not contain '#'"));
        }
        if self.quantity == 0 {
            return Err(invalid("quantity must be positive"));
        }
        if let Some(upis) = &self.upis {
            if upis.len() != self.quantity as usize {
                return Err(invalid("number of UPIs must equal quantity"));
            }
            let mut seen = HashSet::new();
            for upi in upis {
                if upi.trim().is_empty() {
                    return Err(invalid("UPI must not be empty"));
                }
                if !seen.insert(upi.as_str()) {
                    return Err(InventoryError::DuplicateUpi {
                        product: self.product_id.clone(),
                        upi: upi.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Check against the catalogue entry
    pub fn validate_for(&self, product: &Product) -> Result<(), InventoryError> {
        self.validate()?;
        match (product.has_upi, self.upis.is_some()) {
            (true, false) => Err(InventoryError::InvalidItem {
                product: self.product_id.clone(),
                reason: "product is tracked by UPI".to_string(),
            }),
            (false, true) => Err(InventoryError::InvalidItem {
                product: self.product_id.clone(),
                reason: "product is not tracked by UPI".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Merge lines that share a product; output is ordered by product id
pub fn consolidate(
    items: impl IntoIterator<Item = InventoryItem>,
) -> Result<Vec<InventoryItem>, InventoryError> {
    let mut by_product: BTreeMap<String, InventoryItem> = BTreeMap::new();
    for item in items {
        let merged = match by_product.remove(&item.product_id) {
            Some(existing) => existing.merge(&item)?,
            None => item,
        };
        merged.validate()?;
        by_product.insert(merged.product_id.clone(), merged);
    }
    Ok(by_product.into_values().collect())
}

pub fn add_items(
    stock: &[InventoryItem],
    incoming: &[InventoryItem],
) -> Result<Vec<InventoryItem>, InventoryError> {
    consolidate(stock.iter().chain(incoming.iter()).cloned())
}

/// Take `outgoing` out of `stock`. Lines that reach zero are dropped.
pub fn remove_items(
    stock: &[InventoryItem],
    outgoing: &[InventoryItem],
) -> Result<Vec<InventoryItem>, InventoryError> {
    let mut remaining: BTreeMap<String, InventoryItem> = consolidate(stock.iter().cloned())?
        .into_iter()
        .map(|item| (item.product_id.clone(), item))
        .collect();

    for item in consolidate(outgoing.iter().cloned())? {
        let held = remaining
            .get_mut(&item.product_id)
            .ok_or_else(|| InventoryError::Insufficient {
                product: item.product_id.clone(),
                available: 0,
                requested: item.quantity,
            })?;

        if held.quantity < item.quantity {
            return Err(InventoryError::Insufficient {
                product: item.product_id.clone(),
                available: held.quantity,
                requested: item.quantity,
            });
        }

        if let Some(upis) = &item.upis {
            let held_upis = held.upis.get_or_insert_with(Vec::new);
            for upi in upis {
                match held_upis.iter().position(|h| h == upi) {
                    Some(idx) => {
                        held_upis.remove(idx);
                    }
                    None => {
                        return Err(InventoryError::UpiNotFound {
                            product: item.product_id.clone(),
                            upi: upi.clone(),
                        })
                    }
                }
            }
        }
        held.quantity -= item.quantity;
    }

    Ok(remaining
        .into_values()
        .filter(|item| item.quantity > 0)
        .collect())
}

// ========== STORAGE ==========
fn item_from_record(record: &Item) -> Option<InventoryItem> {
    Some(InventoryItem {
        product_id: get_s(record, "productID")?,
        quantity: get_n(record, "quantity")?,
        upis: get_json(record, "upis"),
    })
}

fn record_for(organization_id: &str, holder: &Holder, item: &InventoryItem) -> Result<Item, ApiError> {
    let mut record = HashMap::new();
    record.insert("PK".to_string(), s(org_pk(organization_id)));
    record.insert("SK".to_string(), s(holder.item_sk(&item.product_id)));
    record.insert("productID".to_string(), s(item.product_id.clone()));
    record.insert("quantity".to_string(), n(item.quantity));
    if let Some(upis) = &item.upis {
        record.insert("upis".to_string(), s(serde_json::to_string(upis)?));
    }
    if let Holder::User(user_id) = holder {
        record.insert("userID".to_string(), s(user_id.clone()));
    }
    Ok(record)
}

pub async fn load_holder(
    client: &DynamoClient,
    table_name: &str,
    organization_id: &str,
    holder: &Holder,
) -> Result<Vec<InventoryItem>, ApiError> {
    let records =
        dynamo::query_prefix(client, table_name, &org_pk(organization_id), &holder.sk_prefix())
            .await?;
    Ok(records.iter().filter_map(item_from_record).collect())
}

/// Every user's holdings in an organization, keyed by user id
pub async fn load_user_holdings(
    client: &DynamoClient,
    table_name: &str,
    organization_id: &str,
) -> Result<ItemsByKey<InventoryItem>, ApiError> {
    let records = dynamo::query_prefix(
        client,
        table_name,
        &org_pk(organization_id),
        dynamo::ALL_USER_ITEMS_PREFIX,
    )
    .await?;

    let mut holdings: ItemsByKey<InventoryItem> = HashMap::new();
    for record in &records {
        if let (Some(user_id), Some(item)) = (get_s(record, "userID"), item_from_record(record)) {
            holdings.entry(user_id).or_default().push(item);
        }
    }
    Ok(holdings)
}

/// Someone else changed the same holdings between our read and our write
pub fn stale_inventory() -> ApiError {
    ApiError::conflict(
        ErrorKey::GeneralError,
        "Inventory changed while the request was processed, please retry",
    )
}

fn build_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::Upstream(format!("Failed to build inventory write: {}", e))
}

/// Conditional writes that move a holder from `before` to `after`.
///
/// Each write only applies if the stored line still has the quantity we read
/// (or is still absent), so a concurrent change cancels the whole transaction.
pub fn holder_changes(
    table_name: &str,
    organization_id: &str,
    holder: &Holder,
    before: &[InventoryItem],
    after: &[InventoryItem],
) -> Result<Vec<TransactWriteItem>, ApiError> {
    let before: BTreeMap<&str, &InventoryItem> =
        before.iter().map(|i| (i.product_id.as_str(), i)).collect();
    let after: BTreeMap<&str, &InventoryItem> =
        after.iter().map(|i| (i.product_id.as_str(), i)).collect();
    let products: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

    let mut actions = Vec::new();
    for product_id in products {
        let held = before.get(product_id).copied();
        let action = match (held, after.get(product_id).copied()) {
            (Some(old), Some(new)) if old == new => continue,
            (Some(old), None) => {
                let delete = Delete::builder()
                    .table_name(table_name)
                    .key("PK", s(org_pk(organization_id)))
                    .key("SK", s(holder.item_sk(product_id)))
                    .condition_expression("quantity = :held")
                    .expression_attribute_values(":held", n(old.quantity))
                    .build()
                    .map_err(build_error)?;
                TransactWriteItem::builder().delete(delete).build()
            }
            (held, Some(new)) => {
                let put = Put::builder()
                    .table_name(table_name)
                    .set_item(Some(record_for(organization_id, holder, new)?));
                let put = match held {
                    Some(old) => put
                        .condition_expression("quantity = :held")
                        .expression_attribute_values(":held", n(old.quantity)),
                    None => put.condition_expression("attribute_not_exists(SK)"),
                };
                TransactWriteItem::builder()
                    .put(put.build().map_err(build_error)?)
                    .build()
            }
            (None, None) => continue,
        };
        actions.push(action);
    }
    Ok(actions)
}

/// Read both holders and plan the writes that move `items` from one to the other
pub async fn transfer_actions(
    client: &DynamoClient,
    table_name: &str,
    organization_id: &str,
    from: &Holder,
    to: &Holder,
    items: &[InventoryItem],
) -> Result<Vec<TransactWriteItem>, ApiError> {
    let from_before = load_holder(client, table_name, organization_id, from).await?;
    let to_before = load_holder(client, table_name, organization_id, to).await?;

    let from_after = remove_items(&from_before, items)?;
    let to_after = add_items(&to_before, items)?;

    let mut actions =
        holder_changes(table_name, organization_id, from, &from_before, &from_after)?;
    actions.extend(holder_changes(
        table_name,
        organization_id,
        to,
        &to_before,
        &to_after,
    )?);
    Ok(actions)
}

/// Apply `change` to the warehouse stock as one conditional transaction
async fn update_warehouse<F>(
    state: &AppState,
    organization_id: &str,
    change: F,
) -> Result<(), ApiError>
where
    F: FnOnce(&[InventoryItem]) -> Result<Vec<InventoryItem>, InventoryError>,
{
    let table_name = &state.tables.inventory;
    let before = load_holder(
        &state.dynamo_client,
        table_name,
        organization_id,
        &Holder::Warehouse,
    )
    .await?;
    let after = change(&before)?;
    let actions =
        holder_changes(table_name, organization_id, &Holder::Warehouse, &before, &after)?;
    dynamo::transact(&state.dynamo_client, actions, |_| stale_inventory()).await
}

fn validate_against_catalogue(
    items: &[InventoryItem],
    catalogue: &[Product],
) -> Result<(), InventoryError> {
    for item in items {
        let product = catalogue
            .iter()
            .find(|p| p.id == item.product_id)
            .ok_or_else(|| InventoryError::UnknownProduct(item.product_id.clone()))?;
        item.validate_for(product)?;
    }
    Ok(())
}

// ========== HANDLERS ==========
pub async fn add_inventory(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<BasicResponse, ApiError> {
    let req: InventoryChangeRequest = serde_json::from_slice(body)?;
    ensure_same_organization(ctx, &req.organization_id)?;

    let catalogue =
        products::load_products(&state.dynamo_client, &state.tables.inventory, &req.organization_id)
            .await?;
    validate_against_catalogue(&req.items, &catalogue)?;

    update_warehouse(state, &req.organization_id, |stock| add_items(stock, &req.items)).await?;

    tracing::info!(
        "Added {} inventory lines to organization {}",
        req.items.len(),
        req.organization_id
    );
    Ok(BasicResponse::ok())
}

pub async fn remove_inventory(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<BasicResponse, ApiError> {
    let req: InventoryChangeRequest = serde_json::from_slice(body)?;
    ensure_same_organization(ctx, &req.organization_id)?;
    for item in &req.items {
        item.validate()?;
    }

    update_warehouse(state, &req.organization_id, |stock| remove_items(stock, &req.items)).await?;

    tracing::info!(
        "Removed {} inventory lines from organization {}",
        req.items.len(),
        req.organization_id
    );
    Ok(BasicResponse::ok())
}

pub async fn get_inventory(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<GetInventoryResponse, ApiError> {
    let organization_id = ctx.organization()?;
    let warehouse_items = load_holder(
        &state.dynamo_client,
        &state.tables.inventory,
        organization_id,
        &Holder::Warehouse,
    )
    .await?;
    let users_items =
        load_user_holdings(&state.dynamo_client, &state.tables.inventory, organization_id).await?;

    Ok(GetInventoryResponse {
        basic: BasicResponse::ok(),
        warehouse_items,
        users_items,
    })
}

/// Caller's own holdings; managers may pass `userId` to inspect another member
pub async fn get_user_inventory(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<GetUserInventoryResponse, ApiError> {
    let organization_id = ctx.organization()?;
    let user_id = match ctx.query("userId") {
        Some(other) if !ctx.is_customer() => {
            if !dynamo::is_valid_key_part(other) {
                return Err(ApiError::validation(
                    ErrorKey::UserIdRequired,
                    "userId must be a plain user id",
                ));
            }
            other.to_string()
        }
        _ => ctx.user_id().to_string(),
    };

    let items = load_holder(
        &state.dynamo_client,
        &state.tables.inventory,
        organization_id,
        &Holder::User(user_id),
    )
    .await?;

    Ok(GetUserInventoryResponse {
        basic: BasicResponse::ok(),
        items,
    })
}
