use super::lambdas::get_function_args;
use super::tables::{describe_table_args, table_status};
use super::OpsContext;
use crate::error::OpsError;
use equip_track_shared::dynamo::ALL_TABLES;
use equip_track_shared::endpoints::Endpoint;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub present: Vec<String>,
    pub missing: Vec<String>,
}

pub async fn check_resources(ctx: &OpsContext) -> Result<ValidationReport, OpsError> {
    let mut report = ValidationReport::default();

    for table in &ALL_TABLES {
        let name = table.physical_name(&ctx.global.table_prefix, &ctx.global.stage);
        match ctx.aws.probe(&describe_table_args(&name)).await? {
            Some(description) => {
                tracing::info!(
                    "Table {} {}",
                    name,
                    table_status(&description).unwrap_or("present")
                );
                report.present.push(name);
            }
            None => report.missing.push(name),
        }
    }

    for endpoint in Endpoint::ALL {
        let name = ctx.global.function_name(endpoint.name());
        match ctx.aws.probe(&get_function_args(&name)).await? {
            Some(_) => report.present.push(name),
            None => report.missing.push(name),
        }
    }
    Ok(report)
}

pub async fn validate(ctx: &OpsContext) -> Result<(), OpsError> {
    let report = check_resources(ctx).await?;
    if ctx.dry_run() {
        return Ok(());
    }

    for name in &report.missing {
        tracing::error!("Missing: {}", name);
    }
    println!(
        "{} resources present, {} missing",
        report.present.len(),
        report.missing.len()
    );
    if report.missing.is_empty() {
        Ok(())
    } else {
        Err(OpsError::Missing(report.missing.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use clap::Parser;

    #[tokio::test]
    async fn test_dry_run_checks_every_resource() {
        let dir = tempfile::tempdir().unwrap();
        let info = dir.path().join("deployment-info.json");
        let cli = Cli::try_parse_from([
            "equip-track-ops",
            "--deployment-info",
            info.to_str().unwrap(),
            "validate",
        ])
        .unwrap();
        let ctx = OpsContext::new(cli.global, true);

        let report = check_resources(&ctx).await.unwrap();
        assert!(report.present.is_empty());
        assert_eq!(report.missing.len(), ALL_TABLES.len() + Endpoint::ALL.len());
        assert!(validate(&ctx).await.is_ok());
    }
}
