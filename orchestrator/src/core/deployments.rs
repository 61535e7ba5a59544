use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::types::DEFAULT_ENVIRONMENT;

/// Contract name to deployed address, for one target and environment.
pub type DeploymentRecord = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("Failed to read deployment record {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse deployment record {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Where contracts were deployed on each target.
#[async_trait]
pub trait DeploymentLookup: Send + Sync {
    /// `Ok(None)` means nothing is deployed on this target for the environment.
    async fn get_deployment(
        &self,
        target_id: &str,
        environment: &str,
    ) -> Result<Option<DeploymentRecord>, DeploymentError>;
}

/// Reads `<dir>/<target>.json` (production) or `<dir>/<target>.<environment>.json`.
#[derive(Debug, Clone)]
pub struct FileDeploymentLookup {
    dir: PathBuf,
}

impl FileDeploymentLookup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn record_path(&self, target_id: &str, environment: &str) -> PathBuf {
        if environment == DEFAULT_ENVIRONMENT {
            self.dir.join(format!("{}.json", target_id))
        } else {
            self.dir.join(format!("{}.{}.json", target_id, environment))
        }
    }
}

#[async_trait]
impl DeploymentLookup for FileDeploymentLookup {
    async fn get_deployment(
        &self,
        target_id: &str,
        environment: &str,
    ) -> Result<Option<DeploymentRecord>, DeploymentError> {
        let path = self.record_path(target_id, environment);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(chain = %target_id, path = %path.display(), "No deployment record");
                return Ok(None);
            }
            Err(source) => return Err(DeploymentError::Read { path, source }),
        };
        let record = serde_json::from_str(&content).map_err(|source| DeploymentError::Parse { path, source })?;
        Ok(Some(record))
    }
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}
