pub mod hash;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use hash::hash_action_params;

use crate::types::{TrackingEntry, TrackingStatus};
use crate::utils::fs::atomic_write;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Failed to read ledger {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse ledger {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("Failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write ledger {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("Ledger write task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Catalog entry snapshotted into the ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionMeta {
    pub id: String,
    pub label: String,
    pub params_hash: String,
}

impl ActionMeta {
    pub fn action_key(&self) -> String {
        get_action_key(&self.id, &self.params_hash)
    }
}

/// Composite key of one ledger row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedgerKey {
    pub target_id: String,
    pub action_id: String,
    pub params_hash: String,
}

impl LedgerKey {
    pub fn new(target_id: impl Into<String>, action: &ActionMeta) -> Self {
        Self { target_id: target_id.into(), action_id: action.id.clone(), params_hash: action.params_hash.clone() }
    }

    pub fn action_key(&self) -> String {
        get_action_key(&self.action_id, &self.params_hash)
    }
}

/// Key of an action inside a target's map in the ledger file.
pub fn get_action_key(action_id: &str, params_hash: &str) -> String {
    format!("{}:{}", action_id, params_hash)
}

fn split_action_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once(':')
}

/// On-disk layout of the ledger.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct LedgerFile {
    run_id: String,
    environment: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    actions: Vec<ActionMeta>,
    #[serde(default)]
    targets: BTreeMap<String, BTreeMap<String, TrackingEntry>>,
}

#[derive(Debug, Clone)]
struct Ledger {
    run_id: String,
    environment: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    actions: Vec<ActionMeta>,
    entries: BTreeMap<LedgerKey, TrackingEntry>,
}

impl Ledger {
    fn fresh(environment: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            environment: environment.to_string(),
            created_at: now,
            updated_at: now,
            actions: Vec::new(),
            entries: BTreeMap::new(),
        }
    }

    fn from_file(file: LedgerFile) -> Self {
        let mut entries = BTreeMap::new();
        for (target_id, actions) in file.targets {
            for (action_key, entry) in actions {
                match split_action_key(&action_key) {
                    Some((action_id, params_hash)) => {
                        entries.insert(
                            LedgerKey {
                                target_id: target_id.clone(),
                                action_id: action_id.to_string(),
                                params_hash: params_hash.to_string(),
                            },
                            entry,
                        );
                    }
                    None => warn!(chain = %target_id, key = %action_key, "Dropping ledger entry with malformed key"),
                }
            }
        }
        Self {
            run_id: file.run_id,
            environment: file.environment,
            created_at: file.created_at,
            updated_at: file.updated_at,
            actions: file.actions,
            entries,
        }
    }

    fn to_file(&self) -> LedgerFile {
        let mut targets: BTreeMap<String, BTreeMap<String, TrackingEntry>> = BTreeMap::new();
        for (key, entry) in &self.entries {
            targets.entry(key.target_id.clone()).or_default().insert(key.action_key(), entry.clone());
        }
        LedgerFile {
            run_id: self.run_id.clone(),
            environment: self.environment.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            actions: self.actions.clone(),
            targets,
        }
    }
}

/// Durable, resumable record of every (target, action) pair.
///
/// The in-memory ledger is authoritative during a run. The file is read
/// once at load and only written afterwards, one save at a time.
pub struct TrackingStore {
    path: PathBuf,
    ledger: Mutex<Ledger>,
    write_queue: tokio::sync::Mutex<()>,
}

impl TrackingStore {
    /// Load and reconcile the ledger at `path`.
    ///
    /// A missing, unreadable or other-environment ledger is replaced by a
    /// fresh one. Existing entries keep their status; every missing
    /// (target, action) pair is added as pending.
    pub async fn load(
        path: impl Into<PathBuf>,
        environment: &str,
        actions: &[ActionMeta],
        target_ids: &[String],
    ) -> Self {
        let path = path.into();
        let mut ledger = match read_ledger(&path).await {
            Ok(Some(ledger)) if ledger.environment == environment => {
                debug!(path = %path.display(), run_id = %ledger.run_id, "Resuming ledger");
                ledger
            }
            Ok(Some(ledger)) => {
                warn!(
                    path = %path.display(),
                    stored = %ledger.environment,
                    requested = %environment,
                    "Ledger belongs to another environment, starting fresh"
                );
                Ledger::fresh(environment)
            }
            Ok(None) => {
                info!(path = %path.display(), "No ledger found, starting fresh");
                Ledger::fresh(environment)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ledger is unreadable, starting fresh");
                Ledger::fresh(environment)
            }
        };

        ledger.actions = actions.to_vec();
        for target_id in target_ids {
            for action in actions {
                ledger.entries.entry(LedgerKey::new(target_id.clone(), action)).or_insert_with(TrackingEntry::pending);
            }
        }

        Self { path, ledger: Mutex::new(ledger), write_queue: tokio::sync::Mutex::new(()) }
    }

    /// Open an existing ledger as is, for reporting.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, TrackingError> {
        let path = path.into();
        let ledger = read_ledger(&path).await?.ok_or_else(|| TrackingError::Read {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "ledger file does not exist"),
        })?;
        Ok(Self { path, ledger: Mutex::new(ledger), write_queue: tokio::sync::Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> String {
        self.lock().run_id.clone()
    }

    pub fn environment(&self) -> String {
        self.lock().environment.clone()
    }

    pub fn actions(&self) -> Vec<ActionMeta> {
        self.lock().actions.clone()
    }

    pub fn entry(&self, key: &LedgerKey) -> Option<TrackingEntry> {
        self.lock().entries.get(key).cloned()
    }

    pub fn entries_for(&self, target_id: &str) -> Vec<(LedgerKey, TrackingEntry)> {
        self.lock()
            .entries
            .iter()
            .filter(|(key, _)| key.target_id == target_id)
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    pub fn entries(&self) -> Vec<(LedgerKey, TrackingEntry)> {
        self.lock().entries.iter().map(|(key, entry)| (key.clone(), entry.clone())).collect()
    }

    /// True only when the pair already succeeded.
    pub fn should_skip(&self, key: &LedgerKey) -> bool {
        self.lock().entries.get(key).is_some_and(|e| e.status == TrackingStatus::Success)
    }

    pub fn start_action(&self, key: &LedgerKey) {
        let mut ledger = self.lock();
        let entry = ledger.entries.entry(key.clone()).or_insert_with(TrackingEntry::pending);
        entry.attempts += 1;
        entry.status = TrackingStatus::InProgress;
        entry.last_attempt = Some(Utc::now());
        entry.last_error = None;
    }

    pub fn finish_action(&self, key: &LedgerKey, status: TrackingStatus, error: Option<String>) {
        let mut ledger = self.lock();
        let entry = ledger.entries.entry(key.clone()).or_insert_with(TrackingEntry::pending);
        entry.status = status;
        entry.last_error = error;
    }

    /// Write the whole ledger. Concurrent calls run one after the other.
    pub async fn save(&self) -> Result<(), TrackingError> {
        let _queued = self.write_queue.lock().await;

        let content = {
            let mut ledger = self.lock();
            ledger.updated_at = Utc::now();
            serde_json::to_vec_pretty(&ledger.to_file())?
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            atomic_write(&path, &content).map_err(|source| TrackingError::Write { path: path.clone(), source })
        })
        .await??;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn read_ledger(path: &Path) -> Result<Option<Ledger>, TrackingError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(TrackingError::Read { path: path.to_path_buf(), source }),
    };
    let file: LedgerFile =
        serde_json::from_str(&content).map_err(|source| TrackingError::Parse { path: path.to_path_buf(), source })?;
    Ok(Some(Ledger::from_file(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use tempfile::TempDir;

    #[fixture]
    fn ledger_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn meta(id: &str) -> ActionMeta {
        ActionMeta { id: id.to_string(), label: id.to_string(), params_hash: "0123456789abcdef".to_string() }
    }

    fn targets(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[rstest]
    #[tokio::test]
    async fn fresh_ledger_materializes_pending_entries(ledger_dir: TempDir) {
        let path = ledger_dir.path().join("tracking.json");
        let store =
            TrackingStore::load(&path, "production", &[meta("deploy"), meta("verify")], &targets(&["a", "b"])).await;

        let entries = store.entries();
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|(_, e)| e.status == TrackingStatus::Pending && e.attempts == 0));
    }

    #[rstest]
    #[tokio::test]
    async fn reload_keeps_history_and_adds_new_pairs(ledger_dir: TempDir) {
        let path = ledger_dir.path().join("tracking.json");
        let store = TrackingStore::load(&path, "production", &[meta("deploy")], &targets(&["a"])).await;
        let key = LedgerKey::new("a", &meta("deploy"));
        store.start_action(&key);
        store.finish_action(&key, TrackingStatus::Success, None);
        store.save().await.unwrap();
        let run_id = store.run_id();

        let reloaded =
            TrackingStore::load(&path, "production", &[meta("deploy"), meta("verify")], &targets(&["a", "b"])).await;
        assert_eq!(reloaded.run_id(), run_id);
        assert!(reloaded.should_skip(&key));
        assert_eq!(reloaded.entry(&key).unwrap().attempts, 1);
        assert_eq!(reloaded.entries().len(), 4);
        assert_eq!(reloaded.actions().len(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn other_environment_discards_ledger(ledger_dir: TempDir) {
        let path = ledger_dir.path().join("tracking.json");
        let store = TrackingStore::load(&path, "production", &[meta("deploy")], &targets(&["a"])).await;
        let key = LedgerKey::new("a", &meta("deploy"));
        store.finish_action(&key, TrackingStatus::Success, None);
        store.save().await.unwrap();

        let staging = TrackingStore::load(&path, "staging", &[meta("deploy")], &targets(&["a"])).await;
        assert_ne!(staging.run_id(), store.run_id());
        assert_eq!(staging.environment(), "staging");
        assert!(!staging.should_skip(&key));
    }

    #[rstest]
    #[tokio::test]
    async fn corrupt_ledger_is_replaced(ledger_dir: TempDir) {
        let path = ledger_dir.path().join("tracking.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        let store = TrackingStore::load(&path, "production", &[meta("deploy")], &targets(&["a"])).await;
        assert_eq!(store.entries().len(), 1);
        store.save().await.unwrap();
        assert!(TrackingStore::open(&path).await.is_ok());
    }

    #[rstest]
    #[tokio::test]
    async fn start_and_finish_transitions(ledger_dir: TempDir) {
        let path = ledger_dir.path().join("tracking.json");
        let store = TrackingStore::load(&path, "production", &[meta("deploy")], &targets(&["a"])).await;
        let key = LedgerKey::new("a", &meta("deploy"));

        store.finish_action(&key, TrackingStatus::Failed, Some("boom".to_string()));
        store.start_action(&key);
        let entry = store.entry(&key).unwrap();
        assert_eq!(entry.status, TrackingStatus::InProgress);
        assert_eq!(entry.attempts, 1);
        assert!(entry.last_error.is_none());
        assert!(entry.last_attempt.is_some());
        assert!(!store.should_skip(&key));
    }

    #[rstest]
    #[tokio::test]
    async fn file_layout_nests_targets_and_action_keys(ledger_dir: TempDir) {
        let path = ledger_dir.path().join("nested").join("tracking.json");
        let store = TrackingStore::load(&path, "production", &[meta("deploy")], &targets(&["mainnet"])).await;
        store.save().await.unwrap();

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["environment"], "production");
        assert_eq!(raw["actions"][0]["paramsHash"], "0123456789abcdef");
        assert_eq!(raw["targets"]["mainnet"]["deploy:0123456789abcdef"]["status"], "pending");
        assert!(raw["runId"].is_string());
    }

    #[rstest]
    #[tokio::test]
    async fn concurrent_saves_leave_a_valid_file(ledger_dir: TempDir) {
        let path = ledger_dir.path().join("tracking.json");
        let ids: Vec<String> = (0..20).map(|i| format!("t{}", i)).collect();
        let store = TrackingStore::load(&path, "production", &[meta("deploy")], &ids).await;

        let saves = ids.iter().map(|id| {
            let store = &store;
            async move {
                store.finish_action(&LedgerKey::new(id.clone(), &meta("deploy")), TrackingStatus::Success, None);
                store.save().await
            }
        });
        for result in futures::future::join_all(saves).await {
            result.unwrap();
        }

        let reopened = TrackingStore::open(&path).await.unwrap();
        assert!(reopened.entries().iter().all(|(_, e)| e.status == TrackingStatus::Success));
    }
}
