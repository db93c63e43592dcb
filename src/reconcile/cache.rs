//! Per-run index of everything the remote service holds.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::error::ReconcileError;
use crate::gateway::Gateway;
use crate::models::{Agent, AgentClass, Label, Site, Test};

/// A remote test discovered at load time or written during the run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingTest {
    pub id: String,
    pub test: Test,
}

impl ExistingTest {
    pub fn name(&self) -> &str {
        &self.test.name
    }

    pub fn carries_label(&self, label_id: &str) -> bool {
        self.test.labels.iter().any(|l| l == label_id)
    }
}

/// Authoritative view of remote state for one run. Owned by the caller and
/// passed explicitly; labels and sites created mid-run are inserted so
/// later rows see them.
#[derive(Debug)]
pub struct ResourceCache {
    agent_class: AgentClass,
    labels_by_name: HashMap<String, Label>,
    label_names_by_id: HashMap<String, String>,
    sites_by_name: HashMap<String, Site>,
    agents_by_id: HashMap<String, Agent>,
    // lowercase alias or id -> agent id
    agent_keys: HashMap<String, String>,
    // Names are not unique remotely; the first listed test wins lookups.
    tests_by_name: HashMap<String, Vec<ExistingTest>>,
    test_names_by_id: HashMap<String, String>,
    excluded_agents: usize,
    stale: bool,
}

impl ResourceCache {
    /// An empty cache that will load on the first [`refresh`](Self::refresh).
    pub fn new(agent_class: AgentClass) -> Self {
        Self {
            agent_class,
            labels_by_name: HashMap::new(),
            label_names_by_id: HashMap::new(),
            sites_by_name: HashMap::new(),
            agents_by_id: HashMap::new(),
            agent_keys: HashMap::new(),
            tests_by_name: HashMap::new(),
            test_names_by_id: HashMap::new(),
            excluded_agents: 0,
            stale: true,
        }
    }

    /// Fetches labels, sites, agents and tests. Any category failing to
    /// load fails the whole load.
    pub async fn load(
        gateway: &dyn Gateway,
        agent_class: AgentClass,
    ) -> Result<Self, ReconcileError> {
        let mut cache = Self::new(agent_class);
        cache.refresh(gateway).await?;
        Ok(cache)
    }

    /// Reloads from the remote service if the cache was invalidated.
    pub async fn refresh(&mut self, gateway: &dyn Gateway) -> Result<(), ReconcileError> {
        if !self.stale {
            return Ok(());
        }
        let labels = gateway
            .list_labels()
            .await
            .map_err(|source| ReconcileError::CacheLoad { category: "labels", source })?;
        let sites = gateway
            .list_sites()
            .await
            .map_err(|source| ReconcileError::CacheLoad { category: "sites", source })?;
        let agents = gateway
            .list_agents()
            .await
            .map_err(|source| ReconcileError::CacheLoad { category: "agents", source })?;
        let tests = gateway
            .list_tests()
            .await
            .map_err(|source| ReconcileError::CacheLoad { category: "tests", source })?;

        self.clear();
        for label in labels {
            self.insert_label(label);
        }
        for site in sites {
            self.insert_site(site);
        }
        for agent in agents {
            self.insert_agent(agent);
        }
        for test in tests {
            self.record_test(test);
        }
        self.stale = false;

        info!(
            labels = self.labels_by_name.len(),
            sites = self.sites_by_name.len(),
            agents = self.agents_by_id.len(),
            excluded_agents = self.excluded_agents,
            agent_class = %self.agent_class,
            tests = self.tests_by_name.values().map(Vec::len).sum::<usize>(),
            "Resource cache loaded."
        );
        Ok(())
    }

    /// Drops all cached state; the next [`refresh`](Self::refresh) reloads.
    pub fn invalidate(&mut self) {
        self.clear();
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn clear(&mut self) {
        self.labels_by_name.clear();
        self.label_names_by_id.clear();
        self.sites_by_name.clear();
        self.agents_by_id.clear();
        self.agent_keys.clear();
        self.tests_by_name.clear();
        self.test_names_by_id.clear();
        self.excluded_agents = 0;
    }

    pub fn agent_class(&self) -> AgentClass {
        self.agent_class
    }

    pub fn label(&self, name: &str) -> Option<&Label> {
        self.labels_by_name.get(name)
    }

    pub fn label_id(&self, name: &str) -> Option<&str> {
        self.labels_by_name.get(name).and_then(|l| l.id.as_deref())
    }

    pub fn label_name(&self, id: &str) -> Option<&str> {
        self.label_names_by_id.get(id).map(String::as_str)
    }

    pub fn insert_label(&mut self, label: Label) {
        if self.labels_by_name.contains_key(&label.name) {
            warn!(label = %label.name, "Duplicate label name in remote state, keeping the first.");
            return;
        }
        if let Some(id) = &label.id {
            self.label_names_by_id.insert(id.clone(), label.name.clone());
        }
        self.labels_by_name.insert(label.name.clone(), label);
    }

    pub fn site(&self, name: &str) -> Option<&Site> {
        self.sites_by_name.get(name)
    }

    pub fn insert_site(&mut self, site: Site) {
        if self.sites_by_name.contains_key(&site.title) {
            warn!(site = %site.title, "Duplicate site title in remote state, keeping the first.");
            return;
        }
        self.sites_by_name.insert(site.title.clone(), site);
    }

    fn insert_agent(&mut self, agent: Agent) {
        if !self.agent_class.admits(&agent) {
            debug!(
                agent_id = %agent.id,
                agent = agent.display_name(),
                agent_type = agent.agent_type.as_deref().unwrap_or("unknown"),
                "Agent excluded by capability class."
            );
            self.excluded_agents += 1;
            return;
        }
        self.agent_keys
            .entry(agent.id.to_lowercase())
            .or_insert_with(|| agent.id.clone());
        if let Some(alias) = &agent.alias {
            let key = alias.trim().to_lowercase();
            let taken = self.agent_keys.get(&key).is_some_and(|existing| existing != &agent.id);
            if taken {
                warn!(
                    alias = %alias,
                    agent_id = %agent.id,
                    "Agent alias is ambiguous, keeping the first."
                );
            } else {
                self.agent_keys.insert(key, agent.id.clone());
            }
        }
        self.agents_by_id.insert(agent.id.clone(), agent);
    }

    /// Looks an agent up by alias or id, case-insensitively.
    pub fn agent(&self, key: &str) -> Option<&Agent> {
        self.agent_keys
            .get(&key.trim().to_lowercase())
            .and_then(|id| self.agents_by_id.get(id))
    }

    pub fn agent_by_id(&self, id: &str) -> Option<&Agent> {
        self.agents_by_id.get(id)
    }

    /// Eligible agents affiliated with the site, by site name or by the
    /// cached site's id.
    pub fn agents_at_site(&self, site_name: &str) -> Vec<&Agent> {
        let site_id = self.site(site_name).and_then(|s| s.id.as_deref());
        let mut agents: Vec<&Agent> = self
            .agents_by_id
            .values()
            .filter(|agent| {
                agent.site_name.as_deref() == Some(site_name)
                    || (site_id.is_some() && agent.site_id.as_deref() == site_id)
            })
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn agent_count(&self) -> usize {
        self.agents_by_id.len()
    }

    pub fn excluded_agent_count(&self) -> usize {
        self.excluded_agents
    }

    /// The existing test matching `name` exactly.
    pub fn test(&self, name: &str) -> Option<&ExistingTest> {
        self.tests_by_name.get(name).and_then(|tests| tests.first())
    }

    /// All indexed tests, duplicates by name included.
    pub fn tests(&self) -> impl Iterator<Item = &ExistingTest> {
        self.tests_by_name.values().flatten()
    }

    /// Tests carrying the label named `tag`, sorted by name then id.
    pub fn tests_tagged(&self, tag: &str) -> Vec<&ExistingTest> {
        let Some(label_id) = self.label_id(tag) else {
            return Vec::new();
        };
        let mut tagged: Vec<&ExistingTest> = self
            .tests()
            .filter(|t| t.carries_label(label_id))
            .collect();
        tagged.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id.cmp(&b.id)));
        tagged
    }

    /// Indexes a test returned by the remote service, replacing any entry
    /// with the same id.
    pub fn record_test(&mut self, test: Test) {
        let Some(id) = test.id.clone() else {
            warn!(test = %test.name, "Remote test has no id, ignoring.");
            return;
        };
        self.forget_test_id(&id);
        let entries = self.tests_by_name.entry(test.name.clone()).or_default();
        if !entries.is_empty() {
            warn!(test = %test.name, test_id = %id, "Duplicate test name in remote state.");
        }
        self.test_names_by_id.insert(id.clone(), test.name.clone());
        entries.push(ExistingTest { id, test });
    }

    pub fn remove_test(&mut self, id: &str) -> Option<ExistingTest> {
        self.forget_test_id(id)
    }

    /// Empties the existing-test index, leaving labels, sites and agents.
    pub fn forget_tests(&mut self) {
        self.tests_by_name.clear();
        self.test_names_by_id.clear();
    }

    fn forget_test_id(&mut self, id: &str) -> Option<ExistingTest> {
        let name = self.test_names_by_id.remove(id)?;
        let entries = self.tests_by_name.get_mut(&name)?;
        let pos = entries.iter().position(|t| t.id == id)?;
        let removed = entries.remove(pos);
        if entries.is_empty() {
            self.tests_by_name.remove(&name);
        }
        Some(removed)
    }
}
