//! Drives one reconciliation run from spec rows to a [`RunReport`].

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::cache::ResourceCache;
use super::diff::{self, Decision};
use super::error::ReconcileError;
use super::report::{RemovalOutcome, RowOutcome, RunReport, Stage};
use super::resolver::{DependencyResolver, ResolutionError};
use crate::gateway::Gateway;
use crate::models::{AgentClass, Label, TestStatus};
use crate::spec::{LabelSpec, Row, SourceRow, StructuralError};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Create and update only.
    #[default]
    Incremental,
    /// Also delete tagged tests that no row names.
    DeleteMatching,
    /// Delete every tagged test first, then create everything afresh.
    Redeploy,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Incremental => "incremental",
            RunMode::DeleteMatching => "delete-matching",
            RunMode::Redeploy => "redeploy",
        })
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "incremental" => Ok(RunMode::Incremental),
            "delete-matching" | "delete" => Ok(RunMode::DeleteMatching),
            "redeploy" => Ok(RunMode::Redeploy),
            other => Err(format!("unknown run mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunParams {
    pub management_tag: String,
    pub mode: RunMode,
    pub agent_class: AgentClass,
}

impl RunParams {
    pub fn new(management_tag: impl Into<String>, mode: RunMode) -> Self {
        Self {
            management_tag: management_tag.into(),
            mode,
            agent_class: AgentClass::default(),
        }
    }
}

pub struct Reconciler {
    gateway: Arc<dyn Gateway>,
    params: RunParams,
}

impl Reconciler {
    pub fn new(gateway: Arc<dyn Gateway>, params: RunParams) -> Self {
        Self { gateway, params }
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    /// Runs to completion. Two failures abort the run before any test is
    /// touched: loading remote state, and creating a missing management
    /// label. Without that label no test could be scoped for cleanup, so
    /// its absence is treated like a failed load. Everything else is
    /// recorded per row or per removal in the report.
    pub async fn run(&self, source: &[SourceRow]) -> Result<RunReport, ReconcileError> {
        let tag = self.params.management_tag.as_str();
        let mut report = RunReport::new(self.params.mode, tag);
        info!(mode = %self.params.mode, tag, rows = source.len(), "Starting reconciliation run.");

        let mut cache = ResourceCache::load(self.gateway.as_ref(), self.params.agent_class).await?;
        if self.ensure_management_label(&mut cache).await? {
            report.counts.labels_created += 1;
        }

        let (rows, spec_names) = self.parse(source, &mut report);

        if self.params.mode == RunMode::Redeploy {
            self.delete_tagged(&cache, &mut report, |_| true).await;
            cache.forget_tests();
        }

        let resolver = DependencyResolver::new(self.gateway.as_ref());
        for row in &rows {
            self.reconcile_row(row, &resolver, &mut cache, &mut report).await;
        }

        if self.params.mode == RunMode::DeleteMatching {
            self.delete_tagged(&cache, &mut report, |name| !spec_names.contains(name))
                .await;
        }

        report.finish();
        info!(
            status = ?report.status(),
            created = report.counts.created,
            updated = report.counts.updated,
            skipped_unchanged = report.counts.skipped_unchanged,
            skipped_no_agents = report.counts.skipped_no_agents,
            removed = report.counts.removed,
            failed = report.counts.failed,
            failed_removals = report.counts.failed_removals,
            "Reconciliation run finished."
        );
        Ok(report)
    }

    async fn ensure_management_label(
        &self,
        cache: &mut ResourceCache,
    ) -> Result<bool, ReconcileError> {
        let tag = &self.params.management_tag;
        if cache.label_id(tag).is_some() {
            return Ok(false);
        }
        let spec = LabelSpec::management(tag);
        let label = self
            .gateway
            .create_label(&Label::new(&spec.name, &spec.color, &spec.description))
            .await
            .map_err(|source| ReconcileError::ManagementLabel {
                tag: tag.clone(),
                source,
            })?;
        info!(label = %label.name, label_id = ?label.id, "Created management label.");
        cache.insert_label(label);
        Ok(true)
    }

    /// Parses every record. Returns the valid rows and every name the
    /// source mentions, valid or not.
    fn parse(&self, source: &[SourceRow], report: &mut RunReport) -> (Vec<Row>, BTreeSet<String>) {
        let mut rows = Vec::new();
        let mut spec_names = BTreeSet::new();
        let mut first_lines: HashMap<String, usize> = HashMap::new();

        for item in source {
            let name = item.record.name().unwrap_or_default().to_string();
            if !name.is_empty() {
                spec_names.insert(name.clone());
            }
            let parsed = Row::parse(&item.record, item.line, &self.params.management_tag)
                .and_then(|row| match first_lines.get(&row.name) {
                    Some(&first_line) => Err(StructuralError::DuplicateName {
                        name: row.name.clone(),
                        first_line,
                    }),
                    None => {
                        first_lines.insert(row.name.clone(), row.line);
                        Ok(row)
                    }
                });
            match parsed {
                Ok(row) => rows.push(row),
                Err(e) => {
                    error!(
                        line = item.line,
                        test = %name,
                        error = %e,
                        "Invalid specification row."
                    );
                    report.record_row(
                        item.line,
                        &name,
                        RowOutcome::Failed {
                            stage: Stage::Parse,
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
        (rows, spec_names)
    }

    async fn reconcile_row(
        &self,
        row: &Row,
        resolver: &DependencyResolver<'_>,
        cache: &mut ResourceCache,
        report: &mut RunReport,
    ) {
        let resolved = match resolver.resolve(row, cache).await {
            Ok(resolved) => resolved,
            Err(ResolutionError::NoAgentsAvailable { site }) => {
                warn!(
                    line = row.line,
                    test = %row.name,
                    site = %site,
                    "No eligible agents, skipping row."
                );
                report.record_row(row.line, &row.name, RowOutcome::SkippedNoAgents { site });
                return;
            }
            Err(e) => {
                error!(
                    line = row.line,
                    test = %row.name,
                    error = %e,
                    "Failed to resolve row dependencies."
                );
                report.record_row(
                    row.line,
                    &row.name,
                    RowOutcome::Failed {
                        stage: Stage::Resolve,
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };
        report.counts.labels_created += resolved.labels_created.len();
        if resolved.site_created {
            report.counts.sites_created += 1;
        }

        let outcome = match diff::compare(cache.test(&row.name), resolved.spec) {
            Decision::Skip(id) => {
                debug!(line = row.line, test = %row.name, test_id = %id, "Test unchanged.");
                RowOutcome::Unchanged { id }
            }
            Decision::Create(desired) => {
                let mut wire = desired.to_wire();
                wire.status = Some(TestStatus::Active);
                match self.gateway.create_test(&wire).await {
                    Ok(created) => {
                        let id = created.id.clone().unwrap_or_default();
                        info!(line = row.line, test = %row.name, test_id = %id, "Created test.");
                        cache.record_test(created);
                        RowOutcome::Created { id }
                    }
                    Err(e) => self.apply_failure(row, "create", e.to_string()),
                }
            }
            Decision::Update { id, desired, changes } => {
                // a paused test stays paused across updates
                let mut wire = desired.to_wire();
                wire.status = cache.test(&row.name).and_then(|existing| existing.test.status);
                match self.gateway.update_test(&id, &wire).await {
                    Ok(mut updated) => {
                        updated.id.get_or_insert_with(|| id.clone());
                        info!(
                            line = row.line,
                            test = %row.name,
                            test_id = %id,
                            changes = %changes,
                            "Updated test."
                        );
                        cache.record_test(updated);
                        RowOutcome::Updated { id, changes }
                    }
                    Err(e) => self.apply_failure(row, "update", e.to_string()),
                }
            }
        };
        report.record_row(row.line, &row.name, outcome);
    }

    fn apply_failure(&self, row: &Row, action: &str, reason: String) -> RowOutcome {
        error!(line = row.line, test = %row.name, action, error = %reason, "Failed to apply test.");
        RowOutcome::Failed {
            stage: Stage::Apply,
            reason: format!("{} failed: {}", action, reason),
        }
    }

    /// Deletes every tagged test whose name passes `select`, one at a time,
    /// tolerating per-item failure.
    async fn delete_tagged<F>(&self, cache: &ResourceCache, report: &mut RunReport, select: F)
    where
        F: Fn(&str) -> bool,
    {
        let targets: Vec<(String, String)> = cache
            .tests_tagged(&self.params.management_tag)
            .into_iter()
            .filter(|t| select(t.name()))
            .map(|t| (t.id.clone(), t.name().to_string()))
            .collect();
        if targets.is_empty() {
            debug!(tag = %self.params.management_tag, "Nothing to delete.");
            return;
        }
        info!(count = targets.len(), mode = %self.params.mode, "Deleting tagged tests.");

        for (id, name) in targets {
            match self.gateway.delete_test(&id).await {
                Ok(()) => {
                    info!(test = %name, test_id = %id, "Deleted test.");
                    report.record_removal(&id, &name, RemovalOutcome::Removed);
                }
                Err(e) => {
                    error!(test = %name, test_id = %id, error = %e, "Failed to delete test.");
                    report.record_removal(
                        &id,
                        &name,
                        RemovalOutcome::Failed {
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_mode_parsing() {
        assert_eq!("incremental".parse::<RunMode>().unwrap(), RunMode::Incremental);
        assert_eq!("delete_matching".parse::<RunMode>().unwrap(), RunMode::DeleteMatching);
        assert_eq!("Delete".parse::<RunMode>().unwrap(), RunMode::DeleteMatching);
        assert_eq!("redeploy".parse::<RunMode>().unwrap(), RunMode::Redeploy);
        assert!("nuke".parse::<RunMode>().is_err());
        assert_eq!(RunMode::DeleteMatching.to_string(), "delete-matching");
    }
}
