use crate::info::StepStatus;
use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use equip_track_shared::dynamo::DEFAULT_TABLE_PREFIX;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "equip-track-ops", version, about = "Equip-Track deployment tooling")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Deployment stage
    #[arg(long, env = "STAGE", default_value = "dev", global = true)]
    pub stage: String,

    #[arg(long, env = "AWS_REGION", default_value = "il-central-1", global = true)]
    pub region: String,

    /// Print AWS commands instead of running them (default: on for cleanup)
    #[arg(
        long,
        env = "DRY_RUN",
        global = true,
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub dry_run: Option<bool>,

    /// Domain the API is served under, recorded in the endpoints snapshot
    #[arg(long, env = "BASE_DOMAIN", global = true)]
    pub base_domain: Option<String>,

    #[arg(
        long,
        env = "DEPLOYMENT_INFO",
        default_value = "deployment-info.json",
        global = true
    )]
    pub deployment_info: PathBuf,

    #[arg(long, env = "TABLE_PREFIX", default_value = DEFAULT_TABLE_PREFIX, global = true)]
    pub table_prefix: String,
}

impl GlobalArgs {
    pub fn dry_run_for(&self, command: &Command) -> bool {
        self.dry_run.unwrap_or_else(|| command.is_destructive())
    }

    /// `{prefix}-{stage}-{operation}`
    pub fn function_name(&self, operation: &str) -> String {
        format!("{}-{}-{}", self.table_prefix, self.stage, operation)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start a new deployment run in the info file
    Init {
        #[arg(long, env = "GITHUB_RUN_ID")]
        run_id: Option<String>,
        #[arg(long, env = "GITHUB_SHA")]
        commit: Option<String>,
    },
    /// Record the outcome of one deployment step
    Track {
        step: String,
        #[arg(value_enum)]
        status: StepStatus,
        #[arg(long)]
        error: Option<String>,
        /// Seconds
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Print a summary of the current deployment
    Report,
    /// Write the endpoint registry snapshot used for packaging
    EndpointsConfig {
        #[arg(long, default_value = "endpoints-config.json")]
        output: PathBuf,
    },
    /// Create the DynamoDB tables that do not exist yet
    CreateTables,
    /// Create or update one Lambda function per endpoint
    DeployLambdas(DeployArgs),
    /// Invalidate the CloudFront cache of the frontend
    InvalidateCache {
        /// Falls back to the distribution recorded in the info file
        #[arg(long, env = "CLOUDFRONT_DISTRIBUTION_ID")]
        distribution_id: Option<String>,
        #[arg(long, default_value = "/*")]
        paths: Vec<String>,
    },
    /// Check that every table and function exists
    Validate,
    /// Delete the functions and tables of the stage
    Cleanup {
        #[arg(long)]
        keep_tables: bool,
    },
}

impl Command {
    pub fn is_destructive(&self) -> bool {
        matches!(self, Command::Cleanup { .. })
    }
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    /// Zip holding the `bootstrap` binary
    #[arg(
        long,
        env = "LAMBDA_ZIP",
        default_value = "target/lambda/bootstrap/bootstrap.zip"
    )]
    pub zip: PathBuf,

    #[arg(long, env = "LAMBDA_ROLE_ARN")]
    pub role_arn: Option<String>,

    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Deploy functions concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Restrict to these operations (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,
}
