//! One Lambda function per endpoint, all running the same `bootstrap` binary.

use super::OpsContext;
use crate::aws::{args, retry_transient, AwsCli, RetryPolicy};
use crate::config::DeployArgs;
use crate::error::OpsError;
use crate::info::{ResourceRecord, ResourceState};
use equip_track_shared::endpoints::Endpoint;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinSet;

const RUNTIME: &str = "provided.al2023";
const HANDLER: &str = "bootstrap";
const ARCHITECTURE: &str = "arm64";
const TIMEOUT_SECS: u32 = 30;
const MEMORY_MB: u32 = 256;

/// IAM role propagation and in-flight updates
const CONFLICT_RETRY: RetryPolicy = RetryPolicy::new(6, Duration::from_secs(10));

/// Owned description of one function, so deployments can run on separate tasks
#[derive(Debug, Clone)]
pub struct FunctionDeployment {
    pub endpoint: Endpoint,
    pub function_name: String,
    pub zip_uri: String,
    pub role_arn: String,
    pub environment: String,
}

impl FunctionDeployment {
    pub fn new(
        ctx: &OpsContext,
        endpoint: Endpoint,
        zip: &Path,
        role_arn: &str,
        jwt_secret: &str,
    ) -> Self {
        let environment = json!({
            "Variables": {
                "STAGE": ctx.global.stage,
                "TABLE_PREFIX": ctx.global.table_prefix,
                "JWT_SECRET": jwt_secret,
                "EQUIP_TRACK_ENDPOINT": endpoint.name(),
            }
        });
        Self {
            endpoint,
            function_name: ctx.global.function_name(endpoint.name()),
            zip_uri: format!("fileb://{}", zip.display()),
            role_arn: role_arn.to_string(),
            environment: environment.to_string(),
        }
    }

    pub fn get_args(&self) -> Vec<String> {
        get_function_args(&self.function_name)
    }

    pub fn create_args(&self) -> Vec<String> {
        let timeout = TIMEOUT_SECS.to_string();
        let memory = MEMORY_MB.to_string();
        args([
            "lambda",
            "create-function",
            "--function-name",
            &self.function_name,
            "--runtime",
            RUNTIME,
            "--handler",
            HANDLER,
            "--architectures",
            ARCHITECTURE,
            "--role",
            &self.role_arn,
            "--zip-file",
            &self.zip_uri,
            "--timeout",
            &timeout,
            "--memory-size",
            &memory,
            "--environment",
            &self.environment,
        ])
    }

    pub fn update_code_args(&self) -> Vec<String> {
        args([
            "lambda",
            "update-function-code",
            "--function-name",
            &self.function_name,
            "--zip-file",
            &self.zip_uri,
        ])
    }

    pub fn update_configuration_args(&self) -> Vec<String> {
        args([
            "lambda",
            "update-function-configuration",
            "--function-name",
            &self.function_name,
            "--environment",
            &self.environment,
        ])
    }
}

pub fn get_function_args(function_name: &str) -> Vec<String> {
    args(["lambda", "get-function", "--function-name", function_name])
}

pub fn delete_function_args(function_name: &str) -> Vec<String> {
    args(["lambda", "delete-function", "--function-name", function_name])
}

fn record(state: ResourceState, deployment: &FunctionDeployment, arn: Option<&str>) -> ResourceRecord {
    let mut record = ResourceRecord::new(state, &deployment.function_name);
    record.arn = arn.map(str::to_string);
    record
}

pub async fn deploy_function(
    aws: &AwsCli,
    deployment: &FunctionDeployment,
) -> Result<ResourceRecord, OpsError> {
    let name = &deployment.function_name;

    if aws.probe(&deployment.get_args()).await?.is_some() {
        tracing::info!("Updating {}", name);
        let updated = retry_transient(CONFLICT_RETRY, &format!("code update of {}", name), || async {
            aws.run(&deployment.update_code_args()).await
        })
        .await?;
        retry_transient(CONFLICT_RETRY, &format!("configuration of {}", name), || async {
            aws.run(&deployment.update_configuration_args()).await
        })
        .await?;
        let arn = updated.as_ref().and_then(|v| v["FunctionArn"].as_str());
        return Ok(record(ResourceState::Updated, deployment, arn));
    }

    tracing::info!("Creating {}", name);
    let created = retry_transient(CONFLICT_RETRY, &format!("creation of {}", name), || async {
        aws.run(&deployment.create_args()).await
    })
    .await?;
    match created {
        Some(value) => Ok(record(
            ResourceState::Created,
            deployment,
            value["FunctionArn"].as_str(),
        )),
        None => Ok(record(ResourceState::Pending, deployment, None)),
    }
}

fn selected_endpoints(only: &[String]) -> Result<Vec<Endpoint>, OpsError> {
    if only.is_empty() {
        return Ok(Endpoint::ALL.to_vec());
    }
    only.iter()
        .map(|name| {
            Endpoint::from_name(name.trim()).map_err(|e| OpsError::Precondition(e.to_string()))
        })
        .collect()
}

fn check_preconditions(deploy: &DeployArgs) -> Result<(&str, &str), OpsError> {
    if !deploy.zip.is_file() {
        return Err(OpsError::Precondition(format!(
            "deployment package {} not found; build it with `cargo lambda build --release --arm64 --output-format zip`",
            deploy.zip.display()
        )));
    }
    let role_arn = deploy
        .role_arn
        .as_deref()
        .ok_or_else(|| OpsError::Precondition("LAMBDA_ROLE_ARN is required".to_string()))?;
    let jwt_secret = deploy
        .jwt_secret
        .as_deref()
        .ok_or_else(|| OpsError::Precondition("JWT_SECRET is required".to_string()))?;
    Ok((role_arn, jwt_secret))
}

async fn deploy_sequential(
    aws: &AwsCli,
    deployments: Vec<FunctionDeployment>,
) -> Vec<(FunctionDeployment, Result<ResourceRecord, OpsError>)> {
    let mut results = Vec::with_capacity(deployments.len());
    for deployment in deployments {
        let result = deploy_function(aws, &deployment).await;
        results.push((deployment, result));
    }
    results
}

async fn deploy_parallel(
    aws: &AwsCli,
    deployments: Vec<FunctionDeployment>,
) -> Result<Vec<(FunctionDeployment, Result<ResourceRecord, OpsError>)>, OpsError> {
    let mut join_set = JoinSet::new();
    for deployment in deployments {
        let aws = aws.clone();
        join_set.spawn(async move {
            let result = deploy_function(&aws, &deployment).await;
            (deployment, result)
        });
    }

    let mut results = Vec::with_capacity(join_set.len());
    while let Some(joined) = join_set.join_next().await {
        results.push(joined?);
    }
    Ok(results)
}

pub async fn deploy_lambdas(ctx: &OpsContext, deploy: &DeployArgs) -> Result<(), OpsError> {
    let (role_arn, jwt_secret) = check_preconditions(deploy)?;
    let deployments: Vec<FunctionDeployment> = selected_endpoints(&deploy.only)?
        .into_iter()
        .map(|endpoint| FunctionDeployment::new(ctx, endpoint, &deploy.zip, role_arn, jwt_secret))
        .collect();
    let total = deployments.len();
    tracing::info!(
        "Deploying {} functions ({})",
        total,
        if deploy.parallel { "parallel" } else { "sequential" }
    );

    ctx.tracked("lambda-deploy", async {
        let results = if deploy.parallel {
            deploy_parallel(&ctx.aws, deployments).await?
        } else {
            deploy_sequential(&ctx.aws, deployments).await
        };

        let mut deployed = Vec::with_capacity(results.len());
        let mut failed = 0;
        for (deployment, result) in results {
            match result {
                Ok(record) => deployed.push((deployment.endpoint.name(), record)),
                Err(e) => {
                    failed += 1;
                    tracing::error!("Failed to deploy {}: {}", deployment.function_name, e);
                }
            }
        }

        if !ctx.dry_run() {
            ctx.tracker.update(|info| {
                for (name, record) in deployed {
                    info.backend.lambdas.insert(name.to_string(), record);
                }
            })?;
        }

        if failed > 0 {
            return Err(OpsError::Deploy { failed, total });
        }
        tracing::info!("Deployed {} functions", total);
        Ok(())
    })
    .await
}
