//! `endpoints-config.json`: the endpoint registry as deployed for one stage.

use crate::config::GlobalArgs;
use crate::error::OpsError;
use equip_track_shared::endpoints::{Endpoint, EndpointMeta};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointEntry {
    #[serde(flatten)]
    pub meta: &'static EndpointMeta,
    pub function_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsSnapshot {
    pub generated: String,
    pub stage: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    pub endpoints: Vec<EndpointEntry>,
}

pub fn snapshot(global: &GlobalArgs) -> EndpointsSnapshot {
    EndpointsSnapshot {
        generated: chrono::Utc::now().to_rfc3339(),
        stage: global.stage.clone(),
        region: global.region.clone(),
        api_base_url: global
            .base_domain
            .as_ref()
            .map(|domain| format!("https://api.{}", domain)),
        endpoints: Endpoint::ALL
            .iter()
            .map(|endpoint| EndpointEntry {
                meta: endpoint.meta(),
                function_name: global.function_name(endpoint.name()),
            })
            .collect(),
    }
}

pub fn write_snapshot(global: &GlobalArgs, output: &Path) -> Result<(), OpsError> {
    let json = serde_json::to_string_pretty(&snapshot(global))?;
    std::fs::write(output, json + "\n").map_err(|source| OpsError::Write {
        path: output.to_path_buf(),
        source,
    })?;
    tracing::info!("Endpoint snapshot written to {}", output.display());
    Ok(())
}
