use super::OpsContext;
use crate::aws::{args, poll_until, RetryPolicy};
use crate::error::OpsError;
use crate::info::{ResourceRecord, ResourceState};
use equip_track_shared::dynamo::{TableSpec, ALL_TABLES};
use serde_json::Value;
use std::time::Duration;

const TABLE_ACTIVE_POLL: RetryPolicy = RetryPolicy::new(30, Duration::from_secs(5));

pub fn describe_table_args(name: &str) -> Vec<String> {
    args(["dynamodb", "describe-table", "--table-name", name])
}

pub fn create_table_args(table: &TableSpec, name: &str) -> Vec<String> {
    vec![
        "dynamodb".to_string(),
        "create-table".to_string(),
        "--table-name".to_string(),
        name.to_string(),
        "--attribute-definitions".to_string(),
        format!("AttributeName={},AttributeType=S", table.partition_key),
        format!("AttributeName={},AttributeType=S", table.sort_key),
        "--key-schema".to_string(),
        format!("AttributeName={},KeyType=HASH", table.partition_key),
        format!("AttributeName={},KeyType=RANGE", table.sort_key),
        "--billing-mode".to_string(),
        "PAY_PER_REQUEST".to_string(),
    ]
}

pub fn delete_table_args(name: &str) -> Vec<String> {
    args(["dynamodb", "delete-table", "--table-name", name])
}

pub fn table_status(description: &Value) -> Option<&str> {
    description["Table"]["TableStatus"].as_str()
}

fn table_arn(description: &Value) -> Option<String> {
    description["Table"]["TableArn"].as_str().map(str::to_string)
}

async fn ensure_table(ctx: &OpsContext, table: &TableSpec) -> Result<ResourceRecord, OpsError> {
    let name = table.physical_name(&ctx.global.table_prefix, &ctx.global.stage);

    if let Some(existing) = ctx.aws.probe(&describe_table_args(&name)).await? {
        tracing::info!(
            "Table {} already exists ({})",
            name,
            table_status(&existing).unwrap_or("unknown")
        );
        let mut record = ResourceRecord::new(ResourceState::Exists, &name);
        record.arn = table_arn(&existing);
        return Ok(record);
    }

    tracing::info!("Creating table {}", name);
    let created = ctx.aws.run(&create_table_args(table, &name)).await?;
    if ctx.dry_run() {
        return Ok(ResourceRecord::new(ResourceState::Pending, &name));
    }

    let active = poll_until(TABLE_ACTIVE_POLL, &format!("table {}", name), || async {
        let description = ctx.aws.probe(&describe_table_args(&name)).await?;
        Ok(description.as_ref().and_then(table_status) == Some("ACTIVE"))
    })
    .await?;

    let mut record = ResourceRecord::new(
        if active {
            ResourceState::Created
        } else {
            ResourceState::Pending
        },
        &name,
    );
    record.arn = created["TableDescription"]["TableArn"]
        .as_str()
        .map(str::to_string);
    Ok(record)
}

pub async fn create_tables(ctx: &OpsContext) -> Result<(), OpsError> {
    let records = ctx
        .tracked("dynamodb", async {
            let mut records = Vec::with_capacity(ALL_TABLES.len());
            for table in &ALL_TABLES {
                records.push((table.logical_name, ensure_table(ctx, table).await?));
            }
            Ok(records)
        })
        .await?;

    if ctx.dry_run() {
        return Ok(());
    }
    ctx.tracker.update(|info| {
        for (logical, record) in records {
            info.backend.dynamodb.insert(logical.to_string(), record);
        }
    })?;
    tracing::info!("All {} tables ready", ALL_TABLES.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use equip_track_shared::dynamo::INVENTORY_TABLE;

    #[test]
    fn test_create_table_args() {
        let args = create_table_args(&INVENTORY_TABLE, "equip-track-inventory-dev");
        assert_eq!(args[..4], ["dynamodb", "create-table", "--table-name", "equip-track-inventory-dev"]);
        assert!(args.contains(&"AttributeName=PK,KeyType=HASH".to_string()));
        assert!(args.contains(&"AttributeName=SK,KeyType=RANGE".to_string()));
        assert!(args.ends_with(&["--billing-mode".to_string(), "PAY_PER_REQUEST".to_string()]));
    }

    #[test]
    fn test_table_status() {
        let description = serde_json::json!({"Table": {"TableStatus": "CREATING"}});
        assert_eq!(table_status(&description), Some("CREATING"));
        assert_eq!(table_status(&Value::Null), None);
    }
}
