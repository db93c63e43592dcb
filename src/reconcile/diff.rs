//! Field-level comparison of a desired test against the existing one.
//!
//! Both sides are projected onto [`ComparableTest`], an enumerated list of
//! the fields this tool owns. Server-owned fields (id, timestamps, status)
//! have no place in the projection, so they can never show up as changes.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::builder::TestSpec;
use super::cache::ExistingTest;
use crate::models::{DnsRecord, Test};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Type,
    Target,
    Labels,
    Agents,
    Period,
    DnsServers,
    DnsPort,
    DnsRecordType,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Name => "name",
            Field::Type => "type",
            Field::Target => "target",
            Field::Labels => "labels",
            Field::Agents => "agents",
            Field::Period => "period",
            Field::DnsServers => "dns_servers",
            Field::DnsPort => "dns_port",
            Field::DnsRecordType => "dns_record_type",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub old: String,
    pub new: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changes: BTreeMap<Field, FieldChange>,
    pub agents_to_add: BTreeSet<String>,
    pub agents_to_remove: BTreeSet<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.changes.keys().copied()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, change) in &self.changes {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            match field {
                Field::Agents => write!(
                    f,
                    "agents +[{}] -[{}]",
                    join(&self.agents_to_add),
                    join(&self.agents_to_remove)
                )?,
                _ => write!(f, "{}: '{}' -> '{}'", field, change.old, change.new)?,
            }
        }
        Ok(())
    }
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DnsFields {
    servers: BTreeSet<String>,
    port: Option<u16>,
    record_type: DnsRecord,
}

/// The comparable fields of a test, with labels and agents as sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparableTest {
    name: String,
    test_type: String,
    target: Option<String>,
    labels: BTreeSet<String>,
    agents: BTreeSet<String>,
    period: Option<u32>,
    // Only populated for DNS-family tests.
    dns: Option<DnsFields>,
}

impl ComparableTest {
    pub fn project(test: &Test) -> Self {
        let kind = test.kind();
        let dns = kind
            .filter(|k| k.is_dns())
            .and_then(|k| test.settings.dns_for(k))
            .map(|dns| DnsFields {
                servers: dns.servers.iter().cloned().collect(),
                port: dns.port,
                record_type: dns.record_type.unwrap_or_default(),
            });
        Self {
            name: test.name.clone(),
            test_type: test.test_type.clone(),
            target: kind.and_then(|k| test.settings.target_for(k)),
            labels: test.labels.iter().cloned().collect(),
            agents: test.settings.agent_ids.iter().cloned().collect(),
            period: test.settings.period,
            dns,
        }
    }

    /// Everything that differs, from `self` (existing) to `desired`.
    pub fn diff(&self, desired: &ComparableTest) -> ChangeSet {
        let mut set = ChangeSet::default();
        let mut note = |field: Field, old: String, new: String| {
            if old != new {
                set.changes.insert(field, FieldChange { old, new });
            }
        };

        note(Field::Name, self.name.clone(), desired.name.clone());
        note(Field::Type, self.test_type.clone(), desired.test_type.clone());
        note(Field::Target, opt(&self.target), opt(&desired.target));
        note(Field::Labels, join(&self.labels), join(&desired.labels));
        note(Field::Period, opt(&self.period), opt(&desired.period));

        match (&self.dns, &desired.dns) {
            (None, None) => {}
            (old, new) => {
                let servers = |d: &Option<DnsFields>| {
                    d.as_ref().map(|d| join(&d.servers)).unwrap_or_default()
                };
                let port = |d: &Option<DnsFields>| opt(&d.as_ref().and_then(|d| d.port));
                let record = |d: &Option<DnsFields>| opt(&d.as_ref().map(|d| d.record_type));
                note(Field::DnsServers, servers(old), servers(new));
                note(Field::DnsPort, port(old), port(new));
                note(Field::DnsRecordType, record(old), record(new));
            }
        }

        let agents_to_add: BTreeSet<String> =
            desired.agents.difference(&self.agents).cloned().collect();
        let agents_to_remove: BTreeSet<String> =
            self.agents.difference(&desired.agents).cloned().collect();
        if !agents_to_add.is_empty() || !agents_to_remove.is_empty() {
            set.changes.insert(
                Field::Agents,
                FieldChange {
                    old: join(&self.agents),
                    new: join(&desired.agents),
                },
            );
        }
        set.agents_to_add = agents_to_add;
        set.agents_to_remove = agents_to_remove;
        set
    }
}

fn opt<T: fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Create(TestSpec),
    /// Nothing to do; carries the existing test id.
    Skip(String),
    Update {
        id: String,
        desired: TestSpec,
        changes: ChangeSet,
    },
}

pub fn compare(existing: Option<&ExistingTest>, desired: TestSpec) -> Decision {
    let Some(existing) = existing else {
        return Decision::Create(desired);
    };
    let changes =
        ComparableTest::project(&existing.test).diff(&ComparableTest::project(&desired.to_wire()));
    if changes.is_empty() {
        Decision::Skip(existing.id.clone())
    } else {
        Decision::Update {
            id: existing.id.clone(),
            desired,
            changes,
        }
    }
}
