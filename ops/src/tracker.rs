//! Step-by-step deployment progress persisted in `deployment-info.json`.
//!
//! The overall status is always derived from the recorded steps, so re-recording a
//! step is last-write-wins and the file never disagrees with itself.

use crate::error::OpsError;
use crate::info::{
    derive_status, DeploymentInfo, DeploymentStatus, DeploymentTracking, StepRecord, StepStatus,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Optional extras recorded with a step
#[derive(Debug, Clone, Default)]
pub struct StepDetails {
    pub error: Option<String>,
    /// Seconds; computed from an earlier `started` record when absent
    pub duration: Option<f64>,
}

impl StepDetails {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            duration: None,
        }
    }
}

pub struct DeploymentTracker {
    path: PathBuf,
    stage: String,
    region: String,
}

impl DeploymentTracker {
    pub fn new(path: impl Into<PathBuf>, stage: &str, region: &str) -> Self {
        Self {
            path: path.into(),
            stage: stage.to_string(),
            region: region.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current record; a missing or corrupt file yields a fresh one
    pub fn load(&self) -> DeploymentInfo {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return DeploymentInfo::new(&self.stage, &self.region);
            }
            Err(e) => {
                tracing::warn!("Could not read {}: {}", self.path.display(), e);
                return DeploymentInfo::new(&self.stage, &self.region);
            }
        };
        match serde_json::from_str(&raw) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    "Ignoring corrupt deployment info {}: {}",
                    self.path.display(),
                    e
                );
                DeploymentInfo::new(&self.stage, &self.region)
            }
        }
    }

    pub fn save(&self, info: &mut DeploymentInfo) -> Result<(), OpsError> {
        info.metadata.last_updated = Some(Utc::now().to_rfc3339());
        let json = serde_json::to_string_pretty(info)?;
        std::fs::write(&self.path, json + "\n").map_err(|source| OpsError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Load, apply and persist
    pub fn update<F>(&self, apply: F) -> Result<DeploymentInfo, OpsError>
    where
        F: FnOnce(&mut DeploymentInfo),
    {
        let mut info = self.load();
        apply(&mut info);
        self.save(&mut info)?;
        Ok(info)
    }

    /// Start a new run, discarding the steps of any previous one
    pub fn begin_run(
        &self,
        run_id: Option<String>,
        commit: Option<String>,
    ) -> Result<DeploymentInfo, OpsError> {
        let now = Utc::now();
        self.update(|info| {
            let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            tracing::info!("Starting deployment run {} for {}", run_id, info.stage);
            info.deployment_tracking = Some(new_tracking(run_id, commit, now));
            refresh_status(info, now);
        })
    }

    pub fn track_step(
        &self,
        name: &str,
        status: StepStatus,
        details: StepDetails,
    ) -> Result<DeploymentInfo, OpsError> {
        let now = Utc::now();
        let info = self.update(|info| record_step(info, name, status, details, now))?;
        match status {
            StepStatus::Failed => tracing::error!("Step {} failed", name),
            _ => tracing::info!("Step {} {}", name, status.as_str()),
        }
        Ok(info)
    }

    pub fn generate_report(&self) -> String {
        render_report(&self.load())
    }
}

fn new_tracking(run_id: String, commit: Option<String>, now: DateTime<Utc>) -> DeploymentTracking {
    DeploymentTracking {
        run_id,
        commit,
        started: now.to_rfc3339(),
        completed: None,
        duration: None,
        steps: BTreeMap::new(),
    }
}

fn seconds_between(from: &str, to: DateTime<Utc>) -> Option<f64> {
    let from = DateTime::parse_from_rfc3339(from).ok()?;
    let millis = (to - from.with_timezone(&Utc)).num_milliseconds();
    Some(millis.max(0) as f64 / 1000.0)
}

/// Upsert one step and re-derive the overall status
pub fn record_step(
    info: &mut DeploymentInfo,
    name: &str,
    status: StepStatus,
    details: StepDetails,
    now: DateTime<Utc>,
) {
    let tracking = info.deployment_tracking.get_or_insert_with(|| {
        new_tracking(
            uuid::Uuid::new_v4().to_string(),
            std::env::var("GITHUB_SHA").ok(),
            now,
        )
    });

    let duration = details.duration.or_else(|| match (status, tracking.steps.get(name)) {
        (StepStatus::Started, _) => None,
        (_, Some(prior)) if prior.status == StepStatus::Started => {
            seconds_between(&prior.timestamp, now)
        }
        // A repeated terminal record keeps the timing of the first one
        (_, Some(prior)) if prior.status == status => prior.duration,
        _ => None,
    });

    tracking.steps.insert(
        name.to_string(),
        StepRecord {
            name: name.to_string(),
            status,
            timestamp: now.to_rfc3339(),
            error: details.error,
            duration,
        },
    );

    refresh_status(info, now);
}

fn refresh_status(info: &mut DeploymentInfo, now: DateTime<Utc>) {
    let Some(tracking) = info.deployment_tracking.as_mut() else {
        return;
    };
    info.status = derive_status(tracking.steps.values());
    if info.status.is_terminal() {
        tracking.completed = Some(now.to_rfc3339());
        tracking.duration = seconds_between(&tracking.started, now);
    } else {
        tracking.completed = None;
        tracking.duration = None;
    }
}

fn status_icon(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Started => "…",
        StepStatus::Success => "✓",
        StepStatus::Failed => "✗",
        StepStatus::Skipped => "-",
    }
}

/// Human-readable summary of a deployment record
pub fn render_report(info: &DeploymentInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Deployment report ({} / {})", info.stage, info.region);
    let _ = writeln!(out, "Status: {}", info.status.as_str());

    let Some(tracking) = &info.deployment_tracking else {
        let _ = writeln!(out, "No steps recorded");
        return out;
    };

    let _ = writeln!(out, "Run: {}", tracking.run_id);
    if let Some(commit) = &tracking.commit {
        let _ = writeln!(out, "Commit: {}", commit);
    }
    let _ = writeln!(out, "Started: {}", tracking.started);

    let _ = writeln!(out, "\nSteps:");
    for step in tracking.steps.values() {
        let _ = write!(
            out,
            "  {} {} [{}]",
            status_icon(step.status),
            step.name,
            step.status.as_str()
        );
        if let Some(duration) = step.duration {
            let _ = write!(out, " {:.1}s", duration);
        }
        let _ = writeln!(out);
    }

    let count = |status: StepStatus| {
        tracking
            .steps
            .values()
            .filter(|s| s.status == status)
            .count()
    };
    let _ = writeln!(
        out,
        "\nSuccess: {}  Failed: {}  Skipped: {}  In progress: {}",
        count(StepStatus::Success),
        count(StepStatus::Failed),
        count(StepStatus::Skipped),
        count(StepStatus::Started)
    );

    let failed: Vec<&StepRecord> = failed_steps(info);
    if !failed.is_empty() {
        let _ = writeln!(out, "\nFailed steps:");
        for step in failed {
            let _ = writeln!(
                out,
                "  {}: {}",
                step.name,
                step.error.as_deref().unwrap_or("no error recorded")
            );
        }
    }

    if let (Some(finished), Some(duration)) = (&tracking.completed, tracking.duration) {
        let label = match info.status {
            DeploymentStatus::Completed => "Completed",
            _ => "Ended",
        };
        let _ = writeln!(out, "\n{}: {} (total {:.1}s)", label, finished, duration);
    }
    out
}

pub fn failed_steps(info: &DeploymentInfo) -> Vec<&StepRecord> {
    info.deployment_tracking
        .iter()
        .flat_map(|t| t.steps.values())
        .filter(|s| s.status == StepStatus::Failed)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(dir: &tempfile::TempDir) -> DeploymentTracker {
        DeploymentTracker::new(dir.path().join("deployment-info.json"), "dev", "il-central-1")
    }

    #[test]
    fn test_missing_file_is_fresh_record() {
        let dir = tempfile::tempdir().unwrap();
        let info = tracker(&dir).load();
        assert_eq!(info.status, DeploymentStatus::Initializing);
        assert_eq!(info.stage, "dev");
        assert!(info.deployment_tracking.is_none());
    }

    #[test]
    fn test_started_then_failed_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(&dir);

        let info = tracker
            .track_step("dynamodb", StepStatus::Started, StepDetails::default())
            .unwrap();
        assert_eq!(info.status, DeploymentStatus::InProgress);

        tracker
            .track_step("dynamodb", StepStatus::Success, StepDetails::default())
            .unwrap();
        let info = tracker
            .track_step("lambda-deploy", StepStatus::Failed, StepDetails::error("timeout"))
            .unwrap();
        assert_eq!(info.status, DeploymentStatus::Failed);

        let reloaded = tracker.load();
        let failed = failed_steps(&reloaded);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "lambda-deploy");
        assert_eq!(failed[0].error.as_deref(), Some("timeout"));

        let dynamodb = &reloaded.deployment_tracking.as_ref().unwrap().steps["dynamodb"];
        assert!(dynamodb.duration.is_some());

        let report = tracker.generate_report();
        assert!(report.contains("Status: failed"));
        assert!(report.contains("lambda-deploy: timeout"));
        assert!(report.contains("Success: 1  Failed: 1  Skipped: 0"));
        assert!(!report.contains("Completed:"));
        assert!(report.contains("Ended:"));
    }

    #[test]
    fn test_repeated_success_keeps_computed_duration() {
        let start: DateTime<Utc> = "2026-01-01T10:00:00Z".parse().unwrap();
        let mut info = DeploymentInfo::new("dev", "il-central-1");
        record_step(&mut info, "lambdas", StepStatus::Started, StepDetails::default(), start);
        record_step(
            &mut info,
            "lambdas",
            StepStatus::Success,
            StepDetails::default(),
            start + chrono::Duration::seconds(4),
        );
        record_step(
            &mut info,
            "lambdas",
            StepStatus::Success,
            StepDetails::default(),
            start + chrono::Duration::seconds(9),
        );

        let step = &info.deployment_tracking.as_ref().unwrap().steps["lambdas"];
        assert_eq!(step.status, StepStatus::Success);
        assert_eq!(step.duration, Some(4.0));
        assert_eq!(info.status, DeploymentStatus::Completed);
    }

    #[test]
    fn test_failed_retry_does_not_reuse_failure_timing() {
        let start: DateTime<Utc> = "2026-01-01T10:00:00Z".parse().unwrap();
        let mut info = DeploymentInfo::new("dev", "il-central-1");
        record_step(
            &mut info,
            "lambdas",
            StepStatus::Failed,
            StepDetails { error: None, duration: Some(3.0) },
            start,
        );
        record_step(&mut info, "lambdas", StepStatus::Success, StepDetails::default(), start);

        let step = &info.deployment_tracking.as_ref().unwrap().steps["lambdas"];
        assert_eq!(step.duration, None);
    }

    #[test]
    fn test_completed_records_run_duration() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(&dir);
        tracker
            .begin_run(Some("run-1".to_string()), Some("abc123".to_string()))
            .unwrap();
        tracker
            .track_step("tables", StepStatus::Success, StepDetails::default())
            .unwrap();
        let info = tracker
            .track_step("frontend", StepStatus::Skipped, StepDetails::default())
            .unwrap();

        assert_eq!(info.status, DeploymentStatus::Completed);
        let tracking = info.deployment_tracking.unwrap();
        assert_eq!(tracking.run_id, "run-1");
        assert!(tracking.completed.is_some());
        assert!(tracking.duration.is_some());
        assert!(tracker.generate_report().contains("Completed:"));
    }

    #[test]
    fn test_same_step_twice_is_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(&dir);
        let details = || StepDetails {
            error: None,
            duration: Some(2.0),
        };
        let first = tracker
            .track_step("lambdas", StepStatus::Success, details())
            .unwrap();
        let second = tracker
            .track_step("lambdas", StepStatus::Success, details())
            .unwrap();

        assert_eq!(first.status, second.status);
        let steps = &second.deployment_tracking.unwrap().steps;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps["lambdas"].duration, Some(2.0));
    }

    #[test]
    fn test_begin_run_clears_previous_steps() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(&dir);
        tracker
            .track_step("lambdas", StepStatus::Failed, StepDetails::error("boom"))
            .unwrap();
        let info = tracker.begin_run(None, None).unwrap();
        assert_eq!(info.status, DeploymentStatus::Initializing);
        assert!(info.deployment_tracking.unwrap().steps.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(&dir);
        let saved = tracker
            .track_step("dynamodb", StepStatus::Started, StepDetails::default())
            .unwrap();
        assert_eq!(tracker.load(), saved);
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(&dir);
        std::fs::write(tracker.path(), "{ not json").unwrap();

        assert_eq!(tracker.load().status, DeploymentStatus::Initializing);
        let info = tracker
            .track_step("dynamodb", StepStatus::Success, StepDetails::default())
            .unwrap();
        assert_eq!(info.status, DeploymentStatus::Completed);
    }

    #[test]
    fn test_failure_then_recovery_recomputes_status() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(&dir);
        tracker
            .track_step("lambdas", StepStatus::Failed, StepDetails::error("timeout"))
            .unwrap();
        let info = tracker
            .track_step("lambdas", StepStatus::Success, StepDetails::default())
            .unwrap();
        assert_eq!(info.status, DeploymentStatus::Completed);
        assert!(failed_steps(&info).is_empty());
    }
}
