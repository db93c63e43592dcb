//! Turns a parsed row into a [`TestSpec`] by resolving its agents, labels
//! and site against the cache, creating missing labels and sites.

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{info, warn};

use super::builder::{self, TestSpec};
use super::cache::ResourceCache;
use crate::gateway::{Gateway, GatewayError};
use crate::models::{Label, Site};
use crate::spec::{LabelSpec, Row};

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("cannot resolve {kind} '{name}': {reason}")]
    Unresolvable {
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("no eligible agents at site '{site}'")]
    NoAgentsAvailable { site: String },
    #[error("transport failure while creating {kind} '{name}': {source}")]
    Transport {
        kind: &'static str,
        name: String,
        #[source]
        source: GatewayError,
    },
}

/// A resolved row, plus what had to be created to resolve it.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub spec: TestSpec,
    pub labels_created: Vec<String>,
    pub site_created: bool,
}

pub struct DependencyResolver<'a> {
    gateway: &'a dyn Gateway,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(gateway: &'a dyn Gateway) -> Self {
        Self { gateway }
    }

    /// Agents are resolved from the cache alone and first, so a row that
    /// fails or is skipped here has issued no remote calls.
    pub async fn resolve(
        &self,
        row: &Row,
        cache: &mut ResourceCache,
    ) -> Result<Resolved, ResolutionError> {
        let agent_ids = self.resolve_agents(row, cache)?;
        let mut labels_created = Vec::new();
        let mut label_ids = BTreeSet::new();
        for label in &row.labels {
            if let Some(id) = self.resolve_label(row, label, cache, &mut labels_created).await? {
                label_ids.insert(id);
            }
        }
        let site_created = self.resolve_site(row, cache).await?;

        Ok(Resolved {
            spec: builder::build(row, label_ids, agent_ids),
            labels_created,
            site_created,
        })
    }

    fn resolve_agents(
        &self,
        row: &Row,
        cache: &ResourceCache,
    ) -> Result<BTreeSet<String>, ResolutionError> {
        if !row.agent_names.is_empty() {
            return row
                .agent_names
                .iter()
                .map(|name| {
                    cache.agent(name).map(|a| a.id.clone()).ok_or_else(|| {
                        ResolutionError::Unresolvable {
                            kind: "agent",
                            name: name.clone(),
                            reason: format!(
                                "no {} agent with this alias or id",
                                cache.agent_class()
                            ),
                        }
                    })
                })
                .collect();
        }

        let agents: BTreeSet<String> = cache
            .agents_at_site(&row.site.name)
            .into_iter()
            .map(|a| a.id.clone())
            .collect();
        if agents.is_empty() {
            return Err(ResolutionError::NoAgentsAvailable {
                site: row.site.name.clone(),
            });
        }
        Ok(agents)
    }

    /// Returns the label id, or `None` when creation was refused and the
    /// label is dropped from the test.
    async fn resolve_label(
        &self,
        row: &Row,
        label: &LabelSpec,
        cache: &mut ResourceCache,
        created: &mut Vec<String>,
    ) -> Result<Option<String>, ResolutionError> {
        if let Some(existing) = cache.label(&label.name) {
            return match existing.id.clone() {
                Some(id) => Ok(Some(id)),
                None => {
                    warn!(
                        test = %row.name,
                        label = %label.name,
                        "Cached label has no id, dropping it."
                    );
                    Ok(None)
                }
            };
        }

        let request = Label::new(&label.name, &label.color, &label.description);
        match self.gateway.create_label(&request).await {
            Ok(new_label) => {
                let id = new_label.id.clone();
                info!(test = %row.name, label = %new_label.name, label_id = ?id, "Created label.");
                created.push(new_label.name.clone());
                cache.insert_label(new_label);
                Ok(id)
            }
            Err(e) if e.is_transport() => Err(ResolutionError::Transport {
                kind: "label",
                name: label.name.clone(),
                source: e,
            }),
            Err(e) => {
                warn!(
                    test = %row.name,
                    label = %label.name,
                    error = %e,
                    "Label creation refused, continuing without it."
                );
                Ok(None)
            }
        }
    }

    async fn resolve_site(
        &self,
        row: &Row,
        cache: &mut ResourceCache,
    ) -> Result<bool, ResolutionError> {
        if cache.site(&row.site.name).is_some() {
            return Ok(false);
        }

        let request = Site {
            id: None,
            title: row.site.name.clone(),
            lat: row.site.lat,
            lon: row.site.lon,
            postal_address: Some(row.site.address.clone()).filter(|a| !a.is_empty()),
            site_type: row.site.site_type,
        };
        match self.gateway.create_site(&request).await {
            Ok(site) => {
                info!(test = %row.name, site = %site.title, site_id = ?site.id, "Created site.");
                cache.insert_site(site);
                Ok(true)
            }
            Err(e) if e.is_transport() => Err(ResolutionError::Transport {
                kind: "site",
                name: row.site.name.clone(),
                source: e,
            }),
            Err(e) => Err(ResolutionError::Unresolvable {
                kind: "site",
                name: row.site.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Failure, GatewayOp, MemoryGateway};
    use crate::models::{Agent, AgentClass};
    use crate::spec::SpecRecord;

    fn agent(id: &str, alias: &str, site: &str) -> Agent {
        Agent {
            id: id.to_string(),
            alias: Some(alias.to_string()),
            site_name: Some(site.to_string()),
            site_id: None,
            agent_type: Some("private".to_string()),
            status: None,
            city: None,
            country: None,
        }
    }

    fn row(name: &str, site: &str, labels: &str, agents: &str) -> Row {
        let record = SpecRecord {
            test_name: Some(name.to_string()),
            test_type: Some("hostname".to_string()),
            target: Some("example.com".to_string()),
            site_name: Some(site.to_string()),
            labels: Some(labels.to_string()),
            agent_names: Some(agents.to_string()),
            ..Default::default()
        };
        Row::parse(&record, 2, "csv-managed").unwrap()
    }

    async fn setup(gateway: &MemoryGateway) -> ResourceCache {
        let cache = ResourceCache::load(gateway, AgentClass::Private).await.unwrap();
        gateway.clear_calls().await;
        cache
    }

    #[tokio::test]
    async fn test_missing_named_agent_fails_without_calls() {
        let gateway = MemoryGateway::new().with_agent(agent("1", "ag1", "S1"));
        let mut cache = setup(&gateway).await;
        let err = DependencyResolver::new(&gateway)
            .resolve(&row("A", "S1", "new-label", "ag1, ag-missing"), &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::Unresolvable { kind: "agent", ref name, .. } if name == "ag-missing"
        ));
        assert!(gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_site_without_agents_is_no_agents() {
        let gateway = MemoryGateway::new().with_agent(agent("1", "ag1", "S1"));
        let mut cache = setup(&gateway).await;
        let err = DependencyResolver::new(&gateway)
            .resolve(&row("A", "Empty Site", "", ""), &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::NoAgentsAvailable { ref site } if site == "Empty Site"
        ));
        assert!(gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_new_labels_and_site_are_created_once() {
        let gateway = MemoryGateway::new().with_agent(agent("1", "ag1", "S1"));
        let mut cache = setup(&gateway).await;
        let resolver = DependencyResolver::new(&gateway);

        let first = resolver.resolve(&row("A", "S1", "prod", ""), &mut cache).await.unwrap();
        assert_eq!(first.labels_created, vec!["prod", "csv-managed"]);
        assert!(first.site_created);
        assert_eq!(first.spec.label_ids.len(), 2);
        assert_eq!(first.spec.agent_ids, BTreeSet::from(["1".to_string()]));

        let second = resolver.resolve(&row("B", "S1", "prod", "AG1"), &mut cache).await.unwrap();
        assert!(second.labels_created.is_empty());
        assert!(!second.site_created);
        assert_eq!(second.spec.label_ids, first.spec.label_ids);
        assert_eq!(gateway.mutating_calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_refused_label_is_dropped_but_transport_failure_fails_row() {
        let gateway = MemoryGateway::new()
            .with_agent(agent("1", "ag1", "S1"))
            .with_failure(Failure::rejected(GatewayOp::CreateLabel, 400).for_key("bad"))
            .with_failure(Failure::transport(GatewayOp::CreateLabel).for_key("flaky"));
        let mut cache = setup(&gateway).await;
        let resolver = DependencyResolver::new(&gateway);

        let resolved = resolver.resolve(&row("A", "S1", "bad", ""), &mut cache).await.unwrap();
        assert_eq!(resolved.spec.label_ids.len(), 1);

        let err = resolver.resolve(&row("B", "S1", "flaky", ""), &mut cache).await.unwrap_err();
        assert!(matches!(err, ResolutionError::Transport { kind: "label", .. }));
    }

    #[tokio::test]
    async fn test_refused_site_is_unresolvable() {
        let gateway = MemoryGateway::new()
            .with_agent(agent("1", "ag1", "S1"))
            .with_failure(Failure::rejected(GatewayOp::CreateSite, 400));
        let mut cache = setup(&gateway).await;
        let err = DependencyResolver::new(&gateway)
            .resolve(&row("A", "S1", "", "ag1"), &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Unresolvable { kind: "site", .. }));
    }
}
