use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::core::grouping::{ExecutionGroup, GroupKind, DEFAULT_LEGACY_TAG};
use crate::utils::fs::atomic_write;

const DEFAULT_PROFILE_HEADER: &str = "[profile.default]";
pub const EVM_VERSION_KEY: &str = "evm_version";
pub const SOLC_VERSION_KEY: &str = "solc_version";

/// Lines of build output kept when a rebuild fails
const OUTPUT_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to read build profile {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Failed to write build profile {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("Invalid build profile: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing default build profile: {0}")]
    MissingDefaultProfile(String),

    #[error("Build profile was not backed up before use")]
    NotBackedUp,

    #[error("Failed to start `{command}`: {source}")]
    Spawn { command: String, source: std::io::Error },

    #[error("`{command}` exited with {status}: {output}")]
    BuildFailed { command: String, status: String, output: String },
}

/// The keys written into `[profile.default]` when switching to the legacy build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatProfile {
    pub evm_version: String,
    pub solc_version: String,
}

impl Default for CompatProfile {
    fn default() -> Self {
        Self { evm_version: DEFAULT_LEGACY_TAG.to_string(), solc_version: "0.8.17".to_string() }
    }
}

/// Cleans and rebuilds the project after the profile file changed.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn rebuild(&self) -> Result<(), ProfileError>;
}

/// Runs `<command> clean` then `<command> build`.
#[derive(Debug, Clone)]
pub struct ForgeBuildRunner {
    command: String,
    working_dir: PathBuf,
}

impl ForgeBuildRunner {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self { command: command.into(), working_dir: working_dir.into() }
    }

    async fn run_step(&self, step: &str) -> Result<(), ProfileError> {
        let command = format!("{} {}", self.command, step);
        debug!(command = %command, "Running build step");

        let output = tokio::process::Command::new(&self.command)
            .arg(step)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProfileError::Spawn { command: command.clone(), source })?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let lines: Vec<&str> = combined.lines().collect();
        let tail = lines[lines.len().saturating_sub(OUTPUT_TAIL_LINES)..].join("\n");
        Err(ProfileError::BuildFailed { command, status: output.status.to_string(), output: tail })
    }
}

#[async_trait]
impl BuildRunner for ForgeBuildRunner {
    async fn rebuild(&self) -> Result<(), ProfileError> {
        self.run_step("clean").await?;
        self.run_step("build").await
    }
}

/// Owns the shared build profile file for the duration of a run.
///
/// The file is only ever written through this type, and always back to the
/// snapshot taken by [`BuildProfileManager::backup`] once the run ends.
pub struct BuildProfileManager {
    path: PathBuf,
    legacy: CompatProfile,
    runner: Arc<dyn BuildRunner>,
    snapshot: Mutex<Option<String>>,
}

impl BuildProfileManager {
    pub fn new(path: impl Into<PathBuf>, runner: Arc<dyn BuildRunner>) -> Self {
        Self { path: path.into(), legacy: CompatProfile::default(), runner, snapshot: Mutex::new(None) }
    }

    pub fn with_legacy_profile(mut self, legacy: CompatProfile) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn legacy_profile(&self) -> &CompatProfile {
        &self.legacy
    }

    /// Snapshot the file. Only the first call reads it.
    pub fn backup(&self) -> Result<(), ProfileError> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        if snapshot.is_none() {
            let content = self.read_file()?;
            debug!(path = %self.path.display(), "Backed up build profile");
            *snapshot = Some(content);
        }
        Ok(())
    }

    /// Compatibility tag (`evm_version`) of the default profile in the snapshot.
    pub fn get_default_profile(&self) -> Result<String, ProfileError> {
        let snapshot = self.snapshot()?;
        let document: toml::Table = toml::from_str(&snapshot)?;
        let default = document
            .get("profile")
            .and_then(|p| p.get("default"))
            .ok_or_else(|| {
                ProfileError::MissingDefaultProfile(format!("no {} in {}", DEFAULT_PROFILE_HEADER, self.path.display()))
            })?;
        default.get(EVM_VERSION_KEY).and_then(|v| v.as_str()).map(str::to_string).ok_or_else(|| {
            ProfileError::MissingDefaultProfile(format!("{} has no {}", DEFAULT_PROFILE_HEADER, EVM_VERSION_KEY))
        })
    }

    /// Put the file in the state the group needs, rebuilding if it changed.
    pub async fn apply_profile(&self, group: &ExecutionGroup) -> Result<(), ProfileError> {
        match group.kind {
            GroupKind::Primary | GroupKind::Special => self.ensure_primary_profile().await,
            GroupKind::SecondaryCompat => {
                let evm_version = group.required_compatibility.as_deref().unwrap_or(&self.legacy.evm_version);
                let snapshot = self.snapshot()?;
                let rewritten = rewrite_default_profile(
                    &snapshot,
                    &[(SOLC_VERSION_KEY, self.legacy.solc_version.as_str()), (EVM_VERSION_KEY, evm_version)],
                )?;
                info!(
                    group = %group.kind,
                    evm_version,
                    solc_version = %self.legacy.solc_version,
                    "Switching build profile"
                );
                self.write_file(&rewritten)?;
                self.runner.rebuild().await
            }
        }
    }

    /// Write the snapshot back and rebuild, unless the file already matches it.
    pub async fn ensure_primary_profile(&self) -> Result<(), ProfileError> {
        let snapshot = self.snapshot()?;
        if self.read_file()? == snapshot {
            return Ok(());
        }
        info!(path = %self.path.display(), "Restoring primary build profile");
        self.write_file(&snapshot)?;
        self.runner.rebuild().await
    }

    /// Write the snapshot back without rebuilding. A no-op before `backup`.
    pub fn restore(&self) -> Result<(), ProfileError> {
        let snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(snapshot) = snapshot else {
            return Ok(());
        };
        if std::fs::read_to_string(&self.path).ok().as_deref() == Some(snapshot.as_str()) {
            return Ok(());
        }
        self.write_file(&snapshot)?;
        info!(path = %self.path.display(), "Restored build profile");
        Ok(())
    }

    /// Back up the file and hand out a guard that restores it when dropped.
    pub fn acquire(self: &Arc<Self>) -> Result<ProfileGuard, ProfileError> {
        self.backup()?;
        Ok(ProfileGuard { manager: Arc::clone(self) })
    }

    fn snapshot(&self) -> Result<String, ProfileError> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner()).clone().ok_or(ProfileError::NotBackedUp)
    }

    fn read_file(&self) -> Result<String, ProfileError> {
        std::fs::read_to_string(&self.path).map_err(|source| ProfileError::Read { path: self.path.clone(), source })
    }

    fn write_file(&self, content: &str) -> Result<(), ProfileError> {
        atomic_write(&self.path, content.as_bytes())
            .map_err(|source| ProfileError::Write { path: self.path.clone(), source })
    }
}

/// Restores the build profile snapshot when dropped, including on early return.
pub struct ProfileGuard {
    manager: Arc<BuildProfileManager>,
}

impl ProfileGuard {
    pub fn manager(&self) -> &BuildProfileManager {
        &self.manager
    }
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        if let Err(e) = self.manager.restore() {
            error!(path = %self.manager.path.display(), error = %e, "Failed to restore build profile");
        }
    }
}

/// Set `key = "value"` pairs inside `[profile.default]`, replacing existing
/// lines in place and appending missing keys at the end of the section.
pub fn rewrite_default_profile(content: &str, values: &[(&str, &str)]) -> Result<String, ProfileError> {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    let start = lines
        .iter()
        .position(|line| section_header(line).as_deref() == Some(DEFAULT_PROFILE_HEADER))
        .ok_or_else(|| ProfileError::MissingDefaultProfile(format!("no {} section", DEFAULT_PROFILE_HEADER)))?;
    let mut end = lines[start + 1..]
        .iter()
        .position(|line| section_header(line).is_some())
        .map_or(lines.len(), |offset| start + 1 + offset);

    for (key, value) in values {
        let assignment = format!("{} = \"{}\"", key, value);
        let existing = (start + 1..end).find(|&i| assigned_key(&lines[i]) == Some(*key));
        match existing {
            Some(i) => lines[i] = assignment,
            None => {
                // Keep blank lines that separate this section from the next one
                let mut insert_at = end;
                while insert_at > start + 1 && lines[insert_at - 1].trim().is_empty() {
                    insert_at -= 1;
                }
                lines.insert(insert_at, assignment);
                end += 1;
            }
        }
    }

    let mut rewritten = lines.join("\n");
    if content.ends_with('\n') {
        rewritten.push('\n');
    }
    Ok(rewritten)
}

/// Table header of a line with comments and inner whitespace removed,
/// so `[ profile.default ] # main` reads as `[profile.default]`.
fn section_header(line: &str) -> Option<String> {
    let line = line.split_once('#').map_or(line, |(header, _)| header).trim();
    if !line.starts_with('[') || !line.ends_with(']') {
        return None;
    }
    Some(line.chars().filter(|c| !c.is_whitespace()).collect())
}

fn assigned_key(line: &str) -> Option<&str> {
    let line = line.trim_start();
    if line.starts_with('#') {
        return None;
    }
    line.split_once('=').map(|(key, _)| key.trim())
}
