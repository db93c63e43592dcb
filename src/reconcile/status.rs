//! Bulk pause and resume of managed tests.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, error, info};

use super::cache::ResourceCache;
use super::error::ReconcileError;
use crate::gateway::Gateway;
use crate::models::TestStatus;

#[derive(Debug, Clone)]
pub struct StatusParams {
    pub management_tag: String,
    pub status: TestStatus,
    /// Restricts the change to these test names; all tagged tests otherwise.
    pub names: Option<BTreeSet<String>>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StatusOutcome {
    Changed,
    AlreadySet,
    Failed { reason: String },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StatusItem {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub outcome: StatusOutcome,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub changed: usize,
    pub already_set: usize,
    pub failed: usize,
    /// Requested names with no tagged test behind them.
    pub not_found: Vec<String>,
    pub items: Vec<StatusItem>,
}

impl StatusReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Status change: changed={} already_set={} failed={}",
            self.changed, self.already_set, self.failed
        )?;
        for name in &self.not_found {
            writeln!(f, "  '{}': no test with the management tag", name)?;
        }
        for item in &self.items {
            if let StatusOutcome::Failed { reason } = &item.outcome {
                writeln!(f, "  '{}' ({}) failed: {}", item.name, item.id, reason)?;
            }
        }
        Ok(())
    }
}

/// Sets the lifecycle status of every selected tagged test. Only loading
/// remote state is fatal.
pub async fn set_status(
    gateway: &dyn Gateway,
    cache: &ResourceCache,
    params: &StatusParams,
) -> Result<StatusReport, ReconcileError> {
    let mut report = StatusReport::default();
    let tagged = cache.tests_tagged(&params.management_tag);

    if let Some(names) = &params.names {
        report.not_found = names
            .iter()
            .filter(|name| !tagged.iter().any(|t| t.name() == name.as_str()))
            .cloned()
            .collect();
    }

    for test in tagged {
        if let Some(names) = &params.names {
            if !names.contains(test.name()) {
                continue;
            }
        }
        let outcome = if test.test.status == Some(params.status) {
            debug!(
                test = %test.name(),
                status = ?params.status,
                "Test already in requested state."
            );
            report.already_set += 1;
            StatusOutcome::AlreadySet
        } else {
            match gateway.set_test_status(&test.id, params.status).await {
                Ok(()) => {
                    info!(
                        test = %test.name(),
                        test_id = %test.id,
                        status = ?params.status,
                        "Changed test status."
                    );
                    report.changed += 1;
                    StatusOutcome::Changed
                }
                Err(e) => {
                    error!(
                        test = %test.name(),
                        test_id = %test.id,
                        error = %e,
                        "Failed to change test status."
                    );
                    report.failed += 1;
                    StatusOutcome::Failed { reason: e.to_string() }
                }
            }
        };
        report.items.push(StatusItem {
            id: test.id.clone(),
            name: test.name().to_string(),
            outcome,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Failure, GatewayOp, MemoryGateway};
    use crate::models::{AgentClass, Label, Test};

    fn tagged_test(name: &str, label_id: &str, status: TestStatus) -> Test {
        Test {
            id: None,
            name: name.to_string(),
            test_type: "hostname".to_string(),
            status: Some(status),
            settings: Default::default(),
            labels: vec![label_id.to_string()],
            cdate: None,
            edate: None,
        }
    }

    fn managed_label() -> Label {
        Label {
            id: Some("L1".to_string()),
            ..Label::new("csv-managed", "#00FF00", "CSV managed tests")
        }
    }

    #[tokio::test]
    async fn test_pauses_only_tagged_tests_not_already_paused() {
        let gateway = MemoryGateway::new()
            .with_label(managed_label())
            .with_test(tagged_test("a", "L1", TestStatus::Active))
            .with_test(tagged_test("b", "L1", TestStatus::Paused))
            .with_test(tagged_test("c", "other", TestStatus::Active));
        let cache = ResourceCache::load(&gateway, AgentClass::Private).await.unwrap();
        let params = StatusParams {
            management_tag: "csv-managed".to_string(),
            status: TestStatus::Paused,
            names: None,
        };

        let report = set_status(&gateway, &cache, &params).await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(report.already_set, 1);
        assert_eq!(gateway.test_named("a").await.unwrap().status, Some(TestStatus::Paused));
        assert_eq!(gateway.test_named("c").await.unwrap().status, Some(TestStatus::Active));
    }

    #[tokio::test]
    async fn test_named_selection_and_failures() {
        let gateway = MemoryGateway::new()
            .with_label(managed_label())
            .with_test(tagged_test("a", "L1", TestStatus::Paused))
            .with_test(tagged_test("b", "L1", TestStatus::Paused))
            .with_failure(Failure::transport(GatewayOp::SetTestStatus).for_key("b"));
        let cache = ResourceCache::load(&gateway, AgentClass::Private).await.unwrap();
        let params = StatusParams {
            management_tag: "csv-managed".to_string(),
            status: TestStatus::Active,
            names: Some(["b".to_string(), "zzz".to_string()].into_iter().collect()),
        };

        let report = set_status(&gateway, &cache, &params).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.changed, 0);
        assert_eq!(report.not_found, vec!["zzz"]);
        assert!(!report.is_success());
        assert_eq!(gateway.test_named("a").await.unwrap().status, Some(TestStatus::Paused));
    }
}
