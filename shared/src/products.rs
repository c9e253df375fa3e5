use crate::context::{ensure_same_organization, RequestContext};
use crate::contracts::{GetProductsResponse, SetProductsRequest};
use crate::dynamo::{self, get_bool, get_s, org_pk, product_sk, s, write_batches, Item};
use crate::error::ApiError;
use crate::responses::{BasicResponse, ErrorKey};
use crate::types::Product;
use crate::AppState;
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::{HashMap, HashSet};

fn product_from_record(record: &Item) -> Option<Product> {
    Some(Product {
        id: get_s(record, "id")?,
        name: get_s(record, "name").unwrap_or_default(),
        has_upi: get_bool(record, "hasUpi").unwrap_or(false),
    })
}

pub fn validate_products(products: &[Product]) -> Result<(), ApiError> {
    let mut seen = HashSet::new();
    for product in products {
        if product.id.trim().is_empty() || product.name.trim().is_empty() {
            return Err(ApiError::validation(
                ErrorKey::InvalidProduct,
                "Product id and name are required",
            ));
        }
        if !dynamo::is_valid_key_part(&product.id) {
            return Err(ApiError::validation(
                ErrorKey::InvalidProduct,
                format!("Product id {} must not contain '#'", product.id),
            ));
        }
        if !seen.insert(product.id.as_str()) {
            return Err(ApiError::validation(
                ErrorKey::InvalidProduct,
                format!("Product {} appears more than once", product.id),
            ));
        }
    }
    Ok(())
}

pub async fn load_products(
    client: &DynamoClient,
    table_name: &str,
    organization_id: &str,
) -> Result<Vec<Product>, ApiError> {
    let records =
        dynamo::query_prefix(client, table_name, &org_pk(organization_id), "PRODUCT#").await?;
    Ok(records.iter().filter_map(product_from_record).collect())
}

pub async fn set_products(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<BasicResponse, ApiError> {
    let req: SetProductsRequest = serde_json::from_slice(body)?;
    ensure_same_organization(ctx, &req.organization_id)?;
    validate_products(&req.products)?;

    let mut writes = Vec::with_capacity(req.products.len());
    for product in &req.products {
        let mut item = HashMap::new();
        item.insert("PK".to_string(), s(org_pk(&req.organization_id)));
        item.insert("SK".to_string(), s(product_sk(&product.id)));
        item.insert("id".to_string(), s(product.id.clone()));
        item.insert("name".to_string(), s(product.name.clone()));
        item.insert("hasUpi".to_string(), AttributeValue::Bool(product.has_upi));

        let put = PutRequest::builder()
            .set_item(Some(item))
            .build()
            .map_err(|e| ApiError::Upstream(format!("Failed to build put request: {}", e)))?;
        writes.push(WriteRequest::builder().put_request(put).build());
    }
    write_batches(&state.dynamo_client, &state.tables.inventory, writes).await?;

    tracing::info!(
        "Stored {} products for organization {}",
        req.products.len(),
        req.organization_id
    );
    Ok(BasicResponse::ok())
}

pub async fn get_products(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<GetProductsResponse, ApiError> {
    let products =
        load_products(&state.dynamo_client, &state.tables.inventory, ctx.organization()?).await?;
    Ok(GetProductsResponse {
        basic: BasicResponse::ok(),
        products,
    })
}
