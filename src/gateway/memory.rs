//! An in-process stand-in for the remote service.
//!
//! Keeps every entity in memory, records each call it receives and can be
//! told to fail chosen operations. Used by the test suites and by dry runs.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Gateway, GatewayError, GatewayOp};
use crate::models::{Agent, Label, Site, Test, TestStatus};

/// One call received by a [`MemoryGateway`]. `key` is the entity name for
/// creates and updates, and the test name (falling back to the id) for
/// deletes and status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCall {
    pub op: GatewayOp,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Behaves like a request whose retries were exhausted.
    Transport,
    /// Behaves like a non-retryable client error with this status.
    Rejected(u16),
}

/// A standing instruction to fail matching calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub op: GatewayOp,
    pub key: Option<String>,
    pub kind: FailureKind,
}

impl Failure {
    pub fn transport(op: GatewayOp) -> Self {
        Self { op, key: None, kind: FailureKind::Transport }
    }

    pub fn rejected(op: GatewayOp, status: u16) -> Self {
        Self { op, key: None, kind: FailureKind::Rejected(status) }
    }

    /// Restricts the failure to calls about the named entity.
    pub fn for_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    fn matches(&self, op: GatewayOp, key: Option<&str>) -> bool {
        self.op == op && self.key.as_deref().map_or(true, |k| Some(k) == key)
    }

    fn to_error(&self) -> GatewayError {
        match self.kind {
            FailureKind::Transport => GatewayError::Exhausted {
                attempts: 1,
                message: format!("injected transport failure for {}", self.op),
            },
            FailureKind::Rejected(status) => GatewayError::Rejected {
                status,
                message: format!("injected rejection for {}", self.op),
            },
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    labels: Vec<Label>,
    sites: Vec<Site>,
    agents: Vec<Agent>,
    tests: Vec<Test>,
    calls: Vec<GatewayCall>,
    failures: Vec<Failure>,
}

impl MemoryState {
    fn record(&mut self, op: GatewayOp, key: Option<&str>) -> Result<(), GatewayError> {
        self.calls.push(GatewayCall {
            op,
            key: key.map(str::to_string),
        });
        match self.failures.iter().find(|f| f.matches(op, key)) {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    fn test_key(&self, id: &str) -> String {
        self.tests
            .iter()
            .find(|t| t.id.as_deref() == Some(id))
            .map(|t| t.name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn not_found(kind: &str, id: &str) -> GatewayError {
    GatewayError::Rejected {
        status: 404,
        message: format!("{} '{}' not found", kind, id),
    }
}

#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.state.get_mut().agents.push(agent);
        self
    }

    pub fn with_label(mut self, mut label: Label) -> Self {
        label.id.get_or_insert_with(new_id);
        self.state.get_mut().labels.push(label);
        self
    }

    pub fn with_site(mut self, mut site: Site) -> Self {
        site.id.get_or_insert_with(new_id);
        self.state.get_mut().sites.push(site);
        self
    }

    pub fn with_test(mut self, mut test: Test) -> Self {
        test.id.get_or_insert_with(new_id);
        test.status.get_or_insert(TestStatus::Active);
        self.state.get_mut().tests.push(test);
        self
    }

    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.state.get_mut().failures.push(failure);
        self
    }

    pub async fn inject(&self, failure: Failure) {
        self.state.lock().await.failures.push(failure);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    pub async fn tests(&self) -> Vec<Test> {
        self.state.lock().await.tests.clone()
    }

    pub async fn test_named(&self, name: &str) -> Option<Test> {
        self.state.lock().await.tests.iter().find(|t| t.name == name).cloned()
    }

    pub async fn labels(&self) -> Vec<Label> {
        self.state.lock().await.labels.clone()
    }

    pub async fn sites(&self) -> Vec<Site> {
        self.state.lock().await.sites.clone()
    }

    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn mutating_calls(&self) -> Vec<GatewayCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.op.is_mutation())
            .cloned()
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn list_labels(&self) -> Result<Vec<Label>, GatewayError> {
        let mut state = self.state.lock().await;
        state.record(GatewayOp::ListLabels, None)?;
        Ok(state.labels.clone())
    }

    async fn create_label(&self, label: &Label) -> Result<Label, GatewayError> {
        let mut state = self.state.lock().await;
        state.record(GatewayOp::CreateLabel, Some(&label.name))?;
        if state.labels.iter().any(|l| l.name == label.name) {
            return Err(GatewayError::Rejected {
                status: 409,
                message: format!("label '{}' already exists", label.name),
            });
        }
        let mut created = label.clone();
        let now = Utc::now();
        created.id = Some(new_id());
        created.cdate = Some(now);
        created.edate = Some(now);
        state.labels.push(created.clone());
        Ok(created)
    }

    async fn list_sites(&self) -> Result<Vec<Site>, GatewayError> {
        let mut state = self.state.lock().await;
        state.record(GatewayOp::ListSites, None)?;
        Ok(state.sites.clone())
    }

    async fn create_site(&self, site: &Site) -> Result<Site, GatewayError> {
        let mut state = self.state.lock().await;
        state.record(GatewayOp::CreateSite, Some(&site.title))?;
        if state.sites.iter().any(|s| s.title == site.title) {
            return Err(GatewayError::Rejected {
                status: 409,
                message: format!("site '{}' already exists", site.title),
            });
        }
        let mut created = site.clone();
        created.id = Some(new_id());
        state.sites.push(created.clone());
        Ok(created)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, GatewayError> {
        let mut state = self.state.lock().await;
        state.record(GatewayOp::ListAgents, None)?;
        Ok(state.agents.clone())
    }

    async fn list_tests(&self) -> Result<Vec<Test>, GatewayError> {
        let mut state = self.state.lock().await;
        state.record(GatewayOp::ListTests, None)?;
        Ok(state.tests.clone())
    }

    async fn create_test(&self, test: &Test) -> Result<Test, GatewayError> {
        let mut state = self.state.lock().await;
        state.record(GatewayOp::CreateTest, Some(&test.name))?;
        let mut created = test.clone();
        let now = Utc::now();
        created.id = Some(new_id());
        created.status = Some(test.status.unwrap_or_default());
        created.cdate = Some(now);
        created.edate = Some(now);
        state.tests.push(created.clone());
        Ok(created)
    }

    async fn update_test(&self, id: &str, test: &Test) -> Result<Test, GatewayError> {
        let mut state = self.state.lock().await;
        state.record(GatewayOp::UpdateTest, Some(&test.name))?;
        let existing = state
            .tests
            .iter_mut()
            .find(|t| t.id.as_deref() == Some(id))
            .ok_or_else(|| not_found("test", id))?;
        let mut updated = test.clone();
        updated.id = Some(id.to_string());
        updated.status = test.status.or(existing.status);
        updated.cdate = existing.cdate;
        updated.edate = Some(Utc::now());
        *existing = updated.clone();
        Ok(updated)
    }

    async fn delete_test(&self, id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        let key = state.test_key(id);
        state.record(GatewayOp::DeleteTest, Some(&key))?;
        let before = state.tests.len();
        state.tests.retain(|t| t.id.as_deref() != Some(id));
        if state.tests.len() == before {
            return Err(not_found("test", id));
        }
        Ok(())
    }

    async fn set_test_status(&self, id: &str, status: TestStatus) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        let key = state.test_key(id);
        state.record(GatewayOp::SetTestStatus, Some(&key))?;
        let test = state
            .tests
            .iter_mut()
            .find(|t| t.id.as_deref() == Some(id))
            .ok_or_else(|| not_found("test", id))?;
        test.status = Some(status);
        test.edate = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_test(name: &str) -> Test {
        Test {
            id: None,
            name: name.to_string(),
            test_type: "hostname".to_string(),
            status: None,
            settings: Default::default(),
            labels: vec![],
            cdate: None,
            edate: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_fresh_ids() {
        let gateway = MemoryGateway::new();
        let a = gateway.create_test(&sample_test("a")).await.unwrap();
        let b = gateway.create_test(&sample_test("b")).await.unwrap();
        assert!(a.id.is_some());
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, Some(TestStatus::Active));
    }

    #[tokio::test]
    async fn test_injected_failure_only_hits_matching_key() {
        let gateway = MemoryGateway::new()
            .with_failure(Failure::transport(GatewayOp::CreateTest).for_key("bad"));
        assert!(gateway.create_test(&sample_test("good")).await.is_ok());
        let err = gateway.create_test(&sample_test("bad")).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(gateway.tests().await.len(), 1);
        assert_eq!(gateway.mutating_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_rejected() {
        let gateway = MemoryGateway::new();
        match gateway.delete_test("nope").await {
            Err(GatewayError::Rejected { status, .. }) => assert_eq!(status, 404),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_keeps_status_and_creation_date() {
        let gateway = MemoryGateway::new().with_test(sample_test("t"));
        let stored = gateway.test_named("t").await.unwrap();
        let id = stored.id.clone().unwrap();
        gateway.set_test_status(&id, TestStatus::Paused).await.unwrap();

        let mut desired = sample_test("t");
        desired.settings.period = Some(120);
        let updated = gateway.update_test(&id, &desired).await.unwrap();
        assert_eq!(updated.status, Some(TestStatus::Paused));
        assert_eq!(updated.settings.period, Some(120));
        assert_eq!(updated.cdate, stored.cdate);
    }
}
