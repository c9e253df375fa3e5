//! Tears down a stage. Runs as a dry run unless `DRY_RUN=false` or `--dry-run false`.

use super::lambdas::{delete_function_args, get_function_args};
use super::tables::{delete_table_args, describe_table_args};
use super::OpsContext;
use crate::error::OpsError;
use crate::info::{DeploymentInfo, ResourceState};
use crate::tracker::DeploymentTracker;
use equip_track_shared::dynamo::ALL_TABLES;
use equip_track_shared::endpoints::Endpoint;

/// Deletes one resource if it exists; `true` when something was deleted
async fn delete_if_present(
    ctx: &OpsContext,
    kind: &str,
    name: &str,
    probe: Vec<String>,
    delete: Vec<String>,
) -> Result<bool, OpsError> {
    if !ctx.dry_run() && ctx.aws.probe(&probe).await?.is_none() {
        tracing::info!("{} {} not found, nothing to delete", kind, name);
        return Ok(false);
    }
    ctx.aws.run(&delete).await?;
    if !ctx.dry_run() {
        tracing::info!("Deleted {} {}", kind, name);
    }
    Ok(true)
}

fn mark_deleted(info: &mut DeploymentInfo, functions: &[&str], tables: &[&str]) {
    for name in functions {
        if let Some(record) = info.backend.lambdas.get_mut(*name) {
            record.status = ResourceState::Deleted;
        }
    }
    for name in tables {
        if let Some(record) = info.backend.dynamodb.get_mut(*name) {
            record.status = ResourceState::Deleted;
        }
    }
}

/// Records deletions in the info file as they happen
fn persist_deleted(
    tracker: &DeploymentTracker,
    functions: &[&str],
    tables: &[&str],
) -> Result<(), OpsError> {
    tracker.update(|info| mark_deleted(info, functions, tables))?;
    Ok(())
}

pub async fn cleanup(ctx: &OpsContext, keep_tables: bool) -> Result<(), OpsError> {
    if ctx.dry_run() {
        println!("Dry run: nothing will be deleted. Set DRY_RUN=false to delete.");
    } else {
        tracing::warn!("Deleting all resources of stage {}", ctx.global.stage);
    }

    let mut deleted_functions = 0;
    for endpoint in Endpoint::ALL {
        let name = ctx.global.function_name(endpoint.name());
        if delete_if_present(
            ctx,
            "function",
            &name,
            get_function_args(&name),
            delete_function_args(&name),
        )
        .await?
        {
            if !ctx.dry_run() {
                persist_deleted(&ctx.tracker, &[endpoint.name()], &[])?;
            }
            deleted_functions += 1;
        }
    }

    let mut deleted_tables = 0;
    if keep_tables {
        tracing::info!("Keeping tables");
    } else {
        for table in &ALL_TABLES {
            let name = table.physical_name(&ctx.global.table_prefix, &ctx.global.stage);
            if delete_if_present(
                ctx,
                "table",
                &name,
                describe_table_args(&name),
                delete_table_args(&name),
            )
            .await?
            {
                if !ctx.dry_run() {
                    persist_deleted(&ctx.tracker, &[], &[table.logical_name])?;
                }
                deleted_tables += 1;
            }
        }
    }

    if !ctx.dry_run() {
        println!(
            "Deleted {} functions and {} tables",
            deleted_functions, deleted_tables
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::ResourceRecord;

    #[test]
    fn test_mark_deleted_only_touches_named_resources() {
        let mut info = DeploymentInfo::new("dev", "il-central-1");
        info.backend.lambdas.insert(
            "start".to_string(),
            ResourceRecord::new(ResourceState::Created, "equip-track-dev-start"),
        );
        info.backend.lambdas.insert(
            "getUsers".to_string(),
            ResourceRecord::new(ResourceState::Created, "equip-track-dev-getUsers"),
        );
        info.backend.dynamodb.insert(
            "users".to_string(),
            ResourceRecord::new(ResourceState::Exists, "equip-track-users-dev"),
        );

        mark_deleted(&mut info, &["start"], &["users"]);
        assert_eq!(info.backend.lambdas["start"].status, ResourceState::Deleted);
        assert_eq!(info.backend.lambdas["getUsers"].status, ResourceState::Created);
        assert_eq!(info.backend.dynamodb["users"].status, ResourceState::Deleted);
    }

    #[test]
    fn test_each_deletion_is_on_disk_before_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = DeploymentTracker::new(
            dir.path().join("deployment-info.json"),
            "dev",
            "il-central-1",
        );
        tracker
            .update(|info| {
                for name in ["start", "getUsers"] {
                    info.backend.lambdas.insert(
                        name.to_string(),
                        ResourceRecord::new(
                            ResourceState::Created,
                            format!("equip-track-dev-{}", name),
                        ),
                    );
                }
            })
            .unwrap();

        persist_deleted(&tracker, &["start"], &[]).unwrap();

        let on_disk = tracker.load();
        assert_eq!(on_disk.backend.lambdas["start"].status, ResourceState::Deleted);
        assert_eq!(on_disk.backend.lambdas["getUsers"].status, ResourceState::Created);
    }
}
