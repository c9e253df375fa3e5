//! Thin async wrapper over the `aws` command line.

use crate::error::OpsError;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Error codes that clear up on their own once AWS catches up
pub const TRANSIENT_CODES: &[&str] = &[
    "ResourceConflictException",
    "TooManyRequestsException",
    "ResourceInUseException",
    "The role defined for the function cannot be assumed by Lambda",
];

pub const NOT_FOUND_CODES: &[&str] = &["ResourceNotFoundException", "NoSuchDistribution"];

#[derive(Debug, Clone)]
pub struct AwsCli {
    region: String,
    dry_run: bool,
}

impl AwsCli {
    pub fn new(region: &str, dry_run: bool) -> Self {
        Self {
            region: region.to_string(),
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Full argument list passed to `aws`
    pub fn command_line(&self, args: &[String]) -> Vec<String> {
        let mut full = args.to_vec();
        full.extend([
            "--region".to_string(),
            self.region.clone(),
            "--output".to_string(),
            "json".to_string(),
        ]);
        full
    }

    /// Runs the command and parses its JSON output; dry run only prints it
    pub async fn run(&self, args: &[String]) -> Result<Value, OpsError> {
        let full = self.command_line(args);
        let shown = display_command(&full);
        if self.dry_run {
            println!("[dry-run] {}", shown);
            return Ok(Value::Null);
        }

        tracing::debug!("Running {}", shown);
        let output = tokio::process::Command::new("aws")
            .args(&full)
            .output()
            .await
            .map_err(OpsError::Spawn)?;

        let command = args.iter().take(2).cloned().collect::<Vec<_>>().join(" ");
        if !output.status.success() {
            return Err(OpsError::Aws {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout).map_err(|e| OpsError::Output {
            command,
            detail: e.to_string(),
        })
    }

    /// Like `run`, but a not-found answer is `None`
    pub async fn probe(&self, args: &[String]) -> Result<Option<Value>, OpsError> {
        if self.dry_run {
            self.run(args).await?;
            return Ok(None);
        }
        match self.run(args).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_aws_code(NOT_FOUND_CODES) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Printable command with environment values masked
pub fn display_command(args: &[String]) -> String {
    let mut shown = vec!["aws".to_string()];
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            shown.push("'<environment>'".to_string());
            mask_next = false;
            continue;
        }
        mask_next = arg == "--environment";
        if arg.contains(char::is_whitespace) || arg.contains('{') {
            shown.push(format!("'{}'", arg));
        } else {
            shown.push(arg.clone());
        }
    }
    shown.join(" ")
}

/// Bounded attempts with a fixed sleep between them
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Retries transient AWS failures; gives up with a warning and `None`
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<Option<T>, OpsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OpsError>>,
{
    for attempt in 1..=policy.attempts {
        match op().await {
            Ok(value) => return Ok(Some(value)),
            Err(e) if e.is_aws_code(TRANSIENT_CODES) => {
                tracing::info!(
                    "{} not ready (attempt {}/{}): {}",
                    what,
                    attempt,
                    policy.attempts,
                    e
                );
                if attempt < policy.attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
    tracing::warn!(
        "{} still failing after {} attempts, continuing",
        what,
        policy.attempts
    );
    Ok(None)
}

/// Polls until `check` is true; `false` with a warning once attempts run out
pub async fn poll_until<F, Fut>(policy: RetryPolicy, what: &str, mut check: F) -> Result<bool, OpsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, OpsError>>,
{
    for attempt in 1..=policy.attempts {
        if check().await? {
            return Ok(true);
        }
        tracing::info!("Waiting for {} ({}/{})", what, attempt, policy.attempts);
        if attempt < policy.attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }
    tracing::warn!("Gave up waiting for {}, continuing", what);
    Ok(false)
}

pub fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: RetryPolicy = RetryPolicy::new(3, Duration::from_millis(1));

    fn conflict() -> OpsError {
        OpsError::Aws {
            command: "lambda update-function-code".to_string(),
            code: Some(254),
            stderr: "An error occurred (ResourceConflictException): update in progress".to_string(),
        }
    }

    #[test]
    fn test_command_line_appends_region_and_output() {
        let cli = AwsCli::new("il-central-1", true);
        let full = cli.command_line(&args(["dynamodb", "describe-table", "--table-name", "t"]));
        assert_eq!(
            full[full.len() - 4..],
            ["--region", "il-central-1", "--output", "json"]
        );
    }

    #[test]
    fn test_display_masks_environment() {
        let shown = display_command(&args([
            "lambda",
            "update-function-configuration",
            "--environment",
            r#"{"Variables":{"JWT_SECRET":"s3cret"}}"#,
        ]));
        assert!(!shown.contains("s3cret"));
        assert!(shown.starts_with("aws lambda update-function-configuration"));
    }

    #[tokio::test]
    async fn test_dry_run_returns_null() {
        let cli = AwsCli::new("il-central-1", true);
        let value = cli.run(&args(["dynamodb", "list-tables"])).await.unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(cli.probe(&args(["lambda", "get-function"])).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_conflict() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(FAST, "update", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(conflict())
            } else {
                Ok("done")
            }
        })
        .await
        .unwrap();
        assert_eq!(result, Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_continues() {
        let calls = AtomicU32::new(0);
        let result: Option<()> = retry_transient(FAST, "update", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await
        .unwrap();
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_hide_real_failures() {
        let result: Result<Option<()>, _> =
            retry_transient(FAST, "update", || async { Err(OpsError::Missing(1)) }).await;
        assert!(matches!(result, Err(OpsError::Missing(1))));
    }

    #[tokio::test]
    async fn test_poll_until() {
        let calls = AtomicU32::new(0);
        let ready = poll_until(FAST, "table", || async {
            Ok(calls.fetch_add(1, Ordering::SeqCst) >= 1)
        })
        .await
        .unwrap();
        assert!(ready);

        let never = poll_until(FAST, "table", || async { Ok(false) }).await.unwrap();
        assert!(!never);
    }
}
