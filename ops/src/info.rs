//! `deployment-info.json`: resources created by a deployment and the progress of its steps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    Initializing,
    InProgress,
    Completed,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Completed | DeploymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Initializing => "initializing",
            DeploymentStatus::InProgress => "in-progress",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Started => "started",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTracking {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(default)]
    pub commit: Option<String>,
    pub started: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceState {
    Pending,
    Created,
    Updated,
    Exists,
    Deleted,
    Failed,
}

/// One AWS resource created or touched by the tooling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub status: ResourceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

impl ResourceRecord {
    pub fn new(status: ResourceState, name: impl Into<String>) -> Self {
        Self {
            status,
            name: Some(name.into()),
            id: None,
            arn: None,
            url: None,
            updated: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResources {
    #[serde(default)]
    pub lambdas: BTreeMap<String, ResourceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_gateway: Option<ResourceRecord>,
    #[serde(default)]
    pub dynamodb: BTreeMap<String, ResourceRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontendResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<ResourceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudfront: Option<ResourceRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub created: String,
    pub stage: String,
    pub region: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub metadata: Metadata,
    pub stage: String,
    pub region: String,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub backend: BackendResources,
    #[serde(default)]
    pub frontend: FrontendResources,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_tracking: Option<DeploymentTracking>,
}

impl DeploymentInfo {
    pub fn new(stage: &str, region: &str) -> Self {
        Self {
            metadata: Metadata {
                created: chrono::Utc::now().to_rfc3339(),
                stage: stage.to_string(),
                region: region.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                last_updated: None,
            },
            stage: stage.to_string(),
            region: region.to_string(),
            status: DeploymentStatus::Initializing,
            backend: BackendResources::default(),
            frontend: FrontendResources::default(),
            deployment_tracking: None,
        }
    }

    /// Distribution id recorded by an earlier CloudFront step
    pub fn cloudfront_distribution_id(&self) -> Option<&str> {
        self.frontend
            .cloudfront
            .as_ref()
            .and_then(|cf| cf.id.as_deref())
    }
}

/// Overall status implied by the recorded steps
pub fn derive_status<'a>(steps: impl IntoIterator<Item = &'a StepRecord>) -> DeploymentStatus {
    let mut any = false;
    let mut started = false;
    for step in steps {
        any = true;
        match step.status {
            StepStatus::Failed => return DeploymentStatus::Failed,
            StepStatus::Started => started = true,
            StepStatus::Success | StepStatus::Skipped => {}
        }
    }
    match (any, started) {
        (false, _) => DeploymentStatus::Initializing,
        (true, true) => DeploymentStatus::InProgress,
        (true, false) => DeploymentStatus::Completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(status: StepStatus) -> StepRecord {
        StepRecord {
            name: "s".to_string(),
            status,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            error: None,
            duration: None,
        }
    }

    #[test]
    fn test_derive_status() {
        use StepStatus::*;
        let cases: &[(&[StepStatus], DeploymentStatus)] = &[
            (&[], DeploymentStatus::Initializing),
            (&[Started], DeploymentStatus::InProgress),
            (&[Success, Started], DeploymentStatus::InProgress),
            (&[Success, Skipped], DeploymentStatus::Completed),
            (&[Started, Failed], DeploymentStatus::Failed),
            (&[Success, Failed, Skipped], DeploymentStatus::Failed),
        ];
        for (statuses, expected) in cases {
            let steps: Vec<StepRecord> = statuses.iter().map(|s| step(*s)).collect();
            assert_eq!(derive_status(&steps), *expected, "steps: {:?}", statuses);
        }
    }

    #[test]
    fn test_status_names() {
        let json = serde_json::to_string(&DeploymentStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
        assert_eq!(DeploymentStatus::InProgress.as_str(), "in-progress");
        assert_eq!(serde_json::to_string(&StepStatus::Skipped).unwrap(), "\"skipped\"");
    }

    #[test]
    fn test_reads_partial_document() {
        let raw = r#"{
            "metadata": {"created": "2024-01-01T00:00:00Z", "stage": "dev", "region": "il-central-1", "version": "1"},
            "stage": "dev",
            "region": "il-central-1",
            "status": "initializing",
            "frontend": {"cloudfront": {"status": "created", "id": "E123"}}
        }"#;
        let info: DeploymentInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.cloudfront_distribution_id(), Some("E123"));
        assert!(info.backend.lambdas.is_empty());
        assert!(info.deployment_tracking.is_none());
    }
}
