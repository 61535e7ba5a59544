use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::core::tracking::{ActionMeta, TrackingStore};
use crate::types::{TrackingEntry, TrackingStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounts {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Never finished: pending or still marked in progress
    pub pending: usize,
}

impl ActionCounts {
    fn record(&mut self, status: TrackingStatus) {
        match status {
            TrackingStatus::Success => self.success += 1,
            TrackingStatus::Failed => self.failed += 1,
            TrackingStatus::Skipped => self.skipped += 1,
            TrackingStatus::Pending | TrackingStatus::InProgress => self.pending += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub target_id: String,
    pub action_id: String,
    pub error: String,
}

/// Aggregate outcome of a run, per action.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub dry_run: bool,
    /// In catalog order
    pub actions: Vec<(String, ActionCounts)>,
    pub failures: Vec<FailureRecord>,
    /// Targets no execution group could take
    pub skipped_targets: Vec<String>,
}

impl RunSummary {
    /// Summarize the ledger rows of `target_ids` for `actions`.
    pub fn from_store(
        store: &TrackingStore,
        target_ids: &[String],
        actions: &[ActionMeta],
        skipped_targets: Vec<String>,
    ) -> Self {
        let wanted: HashSet<&str> = target_ids.iter().map(String::as_str).collect();
        let entries = store.entries();
        let rows = entries.iter().filter(|(key, _)| wanted.contains(key.target_id.as_str()));

        let mut by_action: BTreeMap<String, Vec<(&str, &TrackingEntry)>> = BTreeMap::new();
        for (key, entry) in rows {
            by_action.entry(key.action_key()).or_default().push((key.target_id.as_str(), entry));
        }

        let mut summary = RunSummary { skipped_targets, ..Default::default() };
        for action in actions {
            let mut counts = ActionCounts::default();
            for (target_id, entry) in by_action.get(&action.action_key()).into_iter().flatten() {
                counts.record(entry.status);
                if entry.status == TrackingStatus::Failed {
                    summary.failures.push(FailureRecord {
                        target_id: target_id.to_string(),
                        action_id: action.id.clone(),
                        error: entry.last_error.clone().unwrap_or_default(),
                    });
                }
            }
            summary.actions.push((action.id.clone(), counts));
        }
        summary
    }

    /// Every pair reported as skipped, nothing touched.
    pub fn dry_run(target_ids: &[String], actions: &[ActionMeta], skipped_targets: Vec<String>) -> Self {
        let counts = ActionCounts { skipped: target_ids.len(), ..Default::default() };
        RunSummary {
            dry_run: true,
            actions: actions.iter().map(|a| (a.id.clone(), counts)).collect(),
            failures: Vec::new(),
            skipped_targets,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn counts(&self, action_id: &str) -> Option<ActionCounts> {
        self.actions.iter().find(|(id, _)| id == action_id).map(|(_, counts)| *counts)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.actions.iter().map(|(id, _)| id.len()).max().unwrap_or(0).max("Action".len());

        if self.dry_run {
            writeln!(f, "Dry run, nothing was executed")?;
        }
        writeln!(f, "{:<width$}  {:>7}  {:>7}  {:>7}  {:>7}", "Action", "Success", "Failed", "Skipped", "Pending")?;
        for (id, c) in &self.actions {
            writeln!(f, "{:<width$}  {:>7}  {:>7}  {:>7}  {:>7}", id, c.success, c.failed, c.skipped, c.pending)?;
        }

        if !self.failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "Failures:")?;
            for failure in &self.failures {
                writeln!(f, "  {} / {}: {}", failure.target_id, failure.action_id, failure.error)?;
            }
        }

        if !self.skipped_targets.is_empty() {
            writeln!(f)?;
            writeln!(f, "Targets without a matching build profile: {}", self.skipped_targets.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tracking::LedgerKey;

    fn meta(id: &str) -> ActionMeta {
        ActionMeta { id: id.to_string(), label: id.to_string(), params_hash: "aaaaaaaaaaaaaaaa".to_string() }
    }

    #[tokio::test]
    async fn counts_and_failures_follow_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let targets = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let actions = vec![meta("deploy"), meta("verify")];
        let store = TrackingStore::load(dir.path().join("t.json"), "production", &actions, &targets).await;

        store.finish_action(&LedgerKey::new("a", &actions[0]), TrackingStatus::Success, None);
        store.finish_action(&LedgerKey::new("b", &actions[0]), TrackingStatus::Failed, Some("reverted".to_string()));
        store.finish_action(&LedgerKey::new("c", &actions[0]), TrackingStatus::Skipped, None);
        store.start_action(&LedgerKey::new("a", &actions[1]));

        let summary = RunSummary::from_store(&store, &targets, &actions, vec!["d".to_string()]);
        assert_eq!(summary.counts("deploy"), Some(ActionCounts { success: 1, failed: 1, skipped: 1, pending: 0 }));
        assert_eq!(summary.counts("verify"), Some(ActionCounts { success: 0, failed: 0, skipped: 0, pending: 3 }));
        assert!(summary.has_failures());
        assert_eq!(
            summary.failures,
            vec![FailureRecord {
                target_id: "b".to_string(),
                action_id: "deploy".to_string(),
                error: "reverted".to_string(),
            }]
        );

        let rendered = summary.to_string();
        assert!(rendered.contains("b / deploy: reverted"));
        assert!(rendered.contains("Targets without a matching build profile: d"));
    }

    #[test]
    fn dry_run_reports_everything_skipped() {
        let targets = vec!["a".to_string(), "b".to_string()];
        let summary = RunSummary::dry_run(&targets, &[meta("deploy")], Vec::new());
        assert_eq!(summary.counts("deploy"), Some(ActionCounts { success: 0, failed: 0, skipped: 2, pending: 0 }));
        assert!(!summary.has_failures());
        assert!(summary.to_string().starts_with("Dry run"));
    }
}
