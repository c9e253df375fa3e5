use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("Failed to run aws: {0}")]
    Spawn(std::io::Error),
    #[error("aws {command} exited with {code:?}: {stderr}")]
    Aws {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Unexpected aws output for {command}: {detail}")]
    Output { command: String, detail: String },
    #[error("{failed} of {total} functions failed to deploy")]
    Deploy { failed: usize, total: usize },
    #[error("Validation found {0} missing resources")]
    Missing(usize),
    #[error("Deployment task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl OpsError {
    /// AWS failure whose stderr mentions any of the given error codes
    pub fn is_aws_code(&self, codes: &[&str]) -> bool {
        match self {
            OpsError::Aws { stderr, .. } => codes.iter().any(|code| stderr.contains(code)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aws_code_matching() {
        let err = OpsError::Aws {
            command: "lambda get-function".to_string(),
            code: Some(254),
            stderr: "An error occurred (ResourceNotFoundException) when calling GetFunction"
                .to_string(),
        };
        assert!(err.is_aws_code(&["ResourceNotFoundException"]));
        assert!(!err.is_aws_code(&["ResourceConflictException"]));
        assert!(!OpsError::Missing(1).is_aws_code(&["ResourceNotFoundException"]));
    }
}
