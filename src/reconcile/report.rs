use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::ModId;

/// Final status of one mod after a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModStatus {
    Installed,
    Updated,
    Removed,
    NoOp,
    Blocked,
    Failed,
    /// Abandoned before starting because the pass was cancelled.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub mod_id: ModId,
    pub status: ModStatus,
    /// Error text for failed/blocked entries.
    pub detail: Option<String>,
}

/// Complete account of one reconciliation pass. Every planned mod shows
/// up exactly once; nothing is silently dropped.
#[derive(Debug, Serialize)]
pub struct ReconcileReport {
    pub profile: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub entries: Vec<ReportEntry>,
}

impl ReconcileReport {
    pub fn status_of(&self, mod_id: ModId) -> Option<ModStatus> {
        self.entries
            .iter()
            .find(|e| e.mod_id == mod_id)
            .map(|e| e.status)
    }

    pub fn count(&self, status: ModStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// True when no entry failed or was blocked.
    pub fn is_clean(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|e| matches!(e.status, ModStatus::Failed | ModStatus::Blocked))
    }

    pub fn summary(&self) -> String {
        format!(
            "{} installed, {} updated, {} removed, {} no-op, {} blocked, {} failed, {} skipped",
            self.count(ModStatus::Installed),
            self.count(ModStatus::Updated),
            self.count(ModStatus::Removed),
            self.count(ModStatus::NoOp),
            self.count(ModStatus::Blocked),
            self.count(ModStatus::Failed),
            self.count(ModStatus::Skipped),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mod_id: ModId, status: ModStatus) -> ReportEntry {
        ReportEntry {
            mod_id,
            status,
            detail: None,
        }
    }

    #[test]
    fn summary_and_lookup() {
        let report = ReconcileReport {
            profile: "Default".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            cancelled: false,
            entries: vec![entry(1, ModStatus::Installed), entry(2, ModStatus::Failed)],
        };
        assert_eq!(report.status_of(1), Some(ModStatus::Installed));
        assert_eq!(report.status_of(3), None);
        assert!(!report.is_clean());
        assert!(report.summary().starts_with("1 installed"));
    }
}
