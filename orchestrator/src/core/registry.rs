use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use crate::types::TargetConfig;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read target registry {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("Failed to parse target registry: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Registry key '{key}' does not match target name '{name}'")]
    KeyMismatch { key: String, name: String },
}

/// Static, read-only catalog of every known target.
///
/// Iteration order is by target id, which is the order selection results follow.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: BTreeMap<String, TargetConfig>,
}

impl TargetRegistry {
    pub fn new(targets: impl IntoIterator<Item = TargetConfig>) -> Self {
        Self { targets: targets.into_iter().map(|t| (t.id.clone(), t)).collect() }
    }

    /// Parse a registry document of the form `{ "<id>": { "name": "<id>", "chainId": .. } }`.
    pub fn from_json_str(content: &str) -> Result<Self, RegistryError> {
        let raw: BTreeMap<String, TargetConfig> = serde_json::from_str(content)?;
        for (key, target) in &raw {
            if key != &target.id {
                return Err(RegistryError::KeyMismatch { key: key.clone(), name: target.id.clone() });
            }
        }
        Ok(Self { targets: raw })
    }

    pub fn load_from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| RegistryError::Read { path: path.display().to_string(), source })?;
        Self::from_json_str(&content)
    }

    /// All targets, ordered by id.
    pub fn load_all(&self) -> Vec<TargetConfig> {
        self.targets.values().cloned().collect()
    }

    /// Lookup misses are not errors.
    pub fn get(&self, id: &str) -> Option<&TargetConfig> {
        self.targets.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
