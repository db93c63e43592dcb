use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::diff::ChangeSet;
use super::orchestrator::RunMode;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
}

/// Where in the pipeline a row failed.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Resolve,
    Apply,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Created { id: String },
    Updated { id: String, changes: ChangeSet },
    Unchanged { id: String },
    SkippedNoAgents { site: String },
    Failed { stage: Stage, reason: String },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RowRecord {
    pub line: usize,
    /// Empty when the row had no usable name.
    pub name: String,
    #[serde(flatten)]
    pub outcome: RowOutcome,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RemovalOutcome {
    Removed,
    Failed { reason: String },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RemovalRecord {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub outcome: RemovalOutcome,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub created: usize,
    pub updated: usize,
    pub skipped_unchanged: usize,
    pub skipped_no_agents: usize,
    pub removed: usize,
    pub failed: usize,
    pub failed_removals: usize,
    pub labels_created: usize,
    pub sites_created: usize,
}

/// Everything a run did, countable per outcome category.
#[derive(Serialize, Debug, Clone)]
pub struct RunReport {
    pub mode: RunMode,
    pub management_tag: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: RunCounts,
    pub rows: Vec<RowRecord>,
    pub removals: Vec<RemovalRecord>,
}

impl RunReport {
    pub fn new(mode: RunMode, management_tag: &str) -> Self {
        Self {
            mode,
            management_tag: management_tag.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            counts: RunCounts::default(),
            rows: Vec::new(),
            removals: Vec::new(),
        }
    }

    pub fn record_row(&mut self, line: usize, name: &str, outcome: RowOutcome) {
        match &outcome {
            RowOutcome::Created { .. } => self.counts.created += 1,
            RowOutcome::Updated { .. } => self.counts.updated += 1,
            RowOutcome::Unchanged { .. } => self.counts.skipped_unchanged += 1,
            RowOutcome::SkippedNoAgents { .. } => self.counts.skipped_no_agents += 1,
            RowOutcome::Failed { .. } => self.counts.failed += 1,
        }
        self.rows.push(RowRecord {
            line,
            name: name.to_string(),
            outcome,
        });
    }

    pub fn record_removal(&mut self, id: &str, name: &str, outcome: RemovalOutcome) {
        match &outcome {
            RemovalOutcome::Removed => self.counts.removed += 1,
            RemovalOutcome::Failed { .. } => self.counts.failed_removals += 1,
        }
        self.removals.push(RemovalRecord {
            id: id.to_string(),
            name: name.to_string(),
            outcome,
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn status(&self) -> RunStatus {
        if self.counts.failed > 0 || self.counts.failed_removals > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::Success
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &RowRecord> {
        self.rows
            .iter()
            .filter(|r| matches!(r.outcome, RowOutcome::Failed { .. }))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct WithStatus<'a> {
            status: RunStatus,
            #[serde(flatten)]
            report: &'a RunReport,
        }
        serde_json::to_string_pretty(&WithStatus {
            status: self.status(),
            report: self,
        })
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        writeln!(
            f,
            "Reconciliation ({}, tag '{}'): {:?}",
            self.mode,
            self.management_tag,
            self.status()
        )?;
        write!(
            f,
            "  created={} updated={} skipped_unchanged={} skipped_no_agents={}",
            c.created, c.updated, c.skipped_unchanged, c.skipped_no_agents
        )?;
        writeln!(
            f,
            " removed={} failed={} failed_removals={}",
            c.removed, c.failed, c.failed_removals
        )?;
        writeln!(f, "  labels_created={} sites_created={}", c.labels_created, c.sites_created)?;
        for row in &self.rows {
            match &row.outcome {
                RowOutcome::Updated { changes, .. } => {
                    writeln!(f, "  line {} '{}': updated ({})", row.line, row.name, changes)?
                }
                RowOutcome::SkippedNoAgents { site } => {
                    writeln!(
                        f,
                        "  line {} '{}': skipped, no agents at site '{}'",
                        row.line, row.name, site
                    )?
                }
                RowOutcome::Failed { stage, reason } => {
                    writeln!(
                        f,
                        "  line {} '{}': failed during {:?}: {}",
                        row.line, row.name, stage, reason
                    )?
                }
                RowOutcome::Created { .. } | RowOutcome::Unchanged { .. } => {}
            }
        }
        for removal in &self.removals {
            if let RemovalOutcome::Failed { reason } = &removal.outcome {
                writeln!(f, "  removal of '{}' ({}) failed: {}", removal.name, removal.id, reason)?;
            }
        }
        Ok(())
    }
}
