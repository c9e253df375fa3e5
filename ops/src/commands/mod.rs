pub mod cleanup;
pub mod cloudfront;
pub mod endpoints_config;
pub mod lambdas;
pub mod tables;
pub mod validate;

use crate::aws::AwsCli;
use crate::config::{Cli, Command, GlobalArgs};
use crate::error::OpsError;
use crate::info::StepStatus;
use crate::tracker::{DeploymentTracker, StepDetails};
use std::future::Future;

/// Everything a command needs: settings, the AWS CLI and the info file
pub struct OpsContext {
    pub global: GlobalArgs,
    pub aws: AwsCli,
    pub tracker: DeploymentTracker,
}

impl OpsContext {
    pub fn new(global: GlobalArgs, dry_run: bool) -> Self {
        let aws = AwsCli::new(&global.region, dry_run);
        let tracker = DeploymentTracker::new(global.deployment_info.clone(), &global.stage, &global.region);
        Self {
            global,
            aws,
            tracker,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.aws.is_dry_run()
    }

    /// Runs `work` as a tracked step; the info file is left alone in dry run
    pub async fn tracked<T, Fut>(&self, step: &str, work: Fut) -> Result<T, OpsError>
    where
        Fut: Future<Output = Result<T, OpsError>>,
    {
        if self.dry_run() {
            return work.await;
        }
        self.tracker
            .track_step(step, StepStatus::Started, StepDetails::default())?;
        match work.await {
            Ok(value) => {
                self.tracker
                    .track_step(step, StepStatus::Success, StepDetails::default())?;
                Ok(value)
            }
            Err(e) => {
                if let Err(track_err) =
                    self.tracker
                        .track_step(step, StepStatus::Failed, StepDetails::error(e.to_string()))
                {
                    tracing::warn!("Could not record failure of {}: {}", step, track_err);
                }
                Err(e)
            }
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), OpsError> {
    let dry_run = cli.global.dry_run_for(&cli.command);
    let ctx = OpsContext::new(cli.global, dry_run);
    if dry_run {
        tracing::info!("Dry run: AWS commands are printed, not executed");
    }

    match cli.command {
        Command::Init { run_id, commit } => {
            let info = ctx.tracker.begin_run(run_id, commit)?;
            if let Some(tracking) = &info.deployment_tracking {
                println!("Deployment run {} started", tracking.run_id);
            }
            Ok(())
        }
        Command::Track {
            step,
            status,
            error,
            duration,
        } => {
            let info = ctx
                .tracker
                .track_step(&step, status, StepDetails { error, duration })?;
            println!("{}: {} (deployment {})", step, status.as_str(), info.status.as_str());
            Ok(())
        }
        Command::Report => {
            print!("{}", ctx.tracker.generate_report());
            Ok(())
        }
        Command::EndpointsConfig { output } => {
            endpoints_config::write_snapshot(&ctx.global, &output)?;
            println!("Wrote {}", output.display());
            Ok(())
        }
        Command::CreateTables => tables::create_tables(&ctx).await,
        Command::DeployLambdas(args) => lambdas::deploy_lambdas(&ctx, &args).await,
        Command::InvalidateCache {
            distribution_id,
            paths,
        } => cloudfront::invalidate_cache(&ctx, distribution_id, &paths).await,
        Command::Validate => validate::validate(&ctx).await,
        Command::Cleanup { keep_tables } => cleanup::cleanup(&ctx, keep_tables).await,
    }
}
