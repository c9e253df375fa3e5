use super::OpsContext;
use crate::error::OpsError;
use crate::info::{ResourceRecord, ResourceState};

pub fn invalidation_args(distribution_id: &str, paths: &[String]) -> Vec<String> {
    let mut args = vec![
        "cloudfront".to_string(),
        "create-invalidation".to_string(),
        "--distribution-id".to_string(),
        distribution_id.to_string(),
        "--paths".to_string(),
    ];
    args.extend(paths.iter().cloned());
    args
}

pub async fn invalidate_cache(
    ctx: &OpsContext,
    distribution_id: Option<String>,
    paths: &[String],
) -> Result<(), OpsError> {
    let distribution_id = match distribution_id {
        Some(id) => id,
        None => ctx
            .tracker
            .load()
            .cloudfront_distribution_id()
            .map(str::to_string)
            .ok_or_else(|| {
                OpsError::Precondition(format!(
                    "no CloudFront distribution recorded in {}",
                    ctx.tracker.path().display()
                ))
            })?,
    };

    let invalidation = ctx
        .tracked("cloudfront-invalidation", async {
            ctx.aws
                .run(&invalidation_args(&distribution_id, paths))
                .await
        })
        .await?;

    let invalidation_id = invalidation["Invalidation"]["Id"].as_str();
    tracing::info!(
        "Invalidated {:?} on {} ({})",
        paths,
        distribution_id,
        invalidation_id.unwrap_or("dry run")
    );

    if !ctx.dry_run() {
        ctx.tracker.update(|info| {
            let record = info.frontend.cloudfront.get_or_insert_with(|| {
                ResourceRecord::new(ResourceState::Exists, "cloudfront")
            });
            record.id = Some(distribution_id.clone());
            record.updated = Some(chrono::Utc::now().to_rfc3339());
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use clap::Parser;

    #[test]
    fn test_invalidation_args() {
        let args = invalidation_args("E2ABC", &["/*".to_string()]);
        assert_eq!(
            args,
            ["cloudfront", "create-invalidation", "--distribution-id", "E2ABC", "--paths", "/*"]
        );
    }

    #[tokio::test]
    async fn test_requires_known_distribution() {
        let dir = tempfile::tempdir().unwrap();
        let info = dir.path().join("deployment-info.json");
        let cli = Cli::try_parse_from([
            "equip-track-ops",
            "--deployment-info",
            info.to_str().unwrap(),
            "invalidate-cache",
        ])
        .unwrap();
        let ctx = OpsContext::new(cli.global, true);

        let result = invalidate_cache(&ctx, None, &["/*".to_string()]).await;
        assert!(matches!(result, Err(OpsError::Precondition(_))));

        ctx.tracker
            .update(|info| {
                let mut record = ResourceRecord::new(ResourceState::Created, "frontend");
                record.id = Some("E2ABC".to_string());
                info.frontend.cloudfront = Some(record);
            })
            .unwrap();
        invalidate_cache(&ctx, None, &["/*".to_string()]).await.unwrap();
    }
}
