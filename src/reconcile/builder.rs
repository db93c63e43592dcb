//! Type defaults and assembly of a resolved [`TestSpec`].

use std::collections::BTreeSet;

use crate::models::{
    ActivationSettings, DnsRecord, DnsTest, HealthSettings, HostnameTest, IpTest, PageLoadTest,
    PingSettings, Test, TestSettings, TestType, TraceSettings, UrlTest,
};
use crate::spec::Row;

pub const DEFAULT_DNS_PORT: u16 = 53;
pub const DEFAULT_PERIOD_SECS: u32 = 60;
pub const DEFAULT_PAGE_LOAD_PERIOD_SECS: u32 = 300;
pub const URL_TIMEOUT_MS: u32 = 30_000;
pub const PAGE_LOAD_TIMEOUT_MS: u32 = 60_000;

const HTTP_VALID_CODES: [u32; 7] = [200, 201, 202, 204, 301, 302, 304];

/// The fully resolved desired state of one test. Labels and agents are
/// identifiers, every default is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSpec {
    pub name: String,
    pub test_type: TestType,
    pub target: String,
    pub label_ids: BTreeSet<String>,
    pub agent_ids: BTreeSet<String>,
    /// Everything except `agent_ids`, which [`TestSpec::to_wire`] fills in.
    pub settings: TestSettings,
}

impl TestSpec {
    /// The remote shape of this test. `status` is left unset; lifecycle
    /// status belongs to the service and is chosen by the caller.
    pub fn to_wire(&self) -> Test {
        let mut settings = self.settings.clone();
        settings.agent_ids = self.agent_ids.iter().cloned().collect();
        Test {
            id: None,
            name: self.name.clone(),
            test_type: self.test_type.as_str().to_string(),
            status: None,
            settings,
            labels: self.label_ids.iter().cloned().collect(),
            cdate: None,
            edate: None,
        }
    }
}

fn tasks(test_type: TestType, row: &Row) -> Vec<String> {
    let names: &[&str] = match test_type {
        TestType::Ip | TestType::Hostname => &["ping", "traceroute"],
        TestType::Url => &["http", "ping", "traceroute"],
        TestType::PageLoad => &["page-load", "ping", "traceroute"],
        TestType::Dns => &["dns"],
        TestType::DnsGrid => match (row.params.ping.is_set(), row.params.trace.is_set()) {
            (true, true) => &["dns", "ping", "traceroute"],
            (true, false) => &["dns", "ping"],
            (false, true) => &["dns", "traceroute"],
            (false, false) => &["dns"],
        },
    };
    names.iter().map(|s| s.to_string()).collect()
}

fn ping(row: &Row) -> PingSettings {
    let declared = &row.params.ping;
    PingSettings {
        count: Some(declared.count.unwrap_or(3)),
        protocol: Some(declared.protocol.clone().unwrap_or_else(|| "icmp".to_string())),
        port: declared.port,
        timeout: Some(5000),
        delay: Some(100.0),
    }
}

fn trace(row: &Row) -> TraceSettings {
    let declared = &row.params.trace;
    TraceSettings {
        count: Some(declared.count.unwrap_or(3)),
        protocol: Some(declared.protocol.clone().unwrap_or_else(|| "icmp".to_string())),
        port: None,
        timeout: Some(5000),
        limit: Some(declared.limit.unwrap_or(30)),
        delay: Some(100.0),
    }
}

fn health(test_type: TestType) -> HealthSettings {
    let mut health = HealthSettings {
        latency_critical: Some(500.0),
        latency_warning: Some(250.0),
        packet_loss_critical: Some(5.0),
        packet_loss_warning: Some(2.0),
        jitter_critical: Some(100.0),
        jitter_warning: Some(50.0),
        activation: Some(ActivationSettings {
            grace_period: Some("3".to_string()),
            time_unit: Some("m".to_string()),
            time_window: Some("5".to_string()),
            times: Some("3".to_string()),
        }),
        ..Default::default()
    };
    match test_type {
        TestType::Dns | TestType::DnsGrid => {
            health.dns_valid_codes = Some(vec![0]);
            health.dns_latency_critical = Some(1000.0);
            health.dns_latency_warning = Some(500.0);
        }
        TestType::Url | TestType::PageLoad => {
            health.http_latency_critical = Some(3000.0);
            health.http_latency_warning = Some(1500.0);
            health.http_valid_codes = Some(HTTP_VALID_CODES.to_vec());
        }
        TestType::Ip | TestType::Hostname => {}
    }
    health
}

/// Builds the desired test for a row whose labels and agents have been
/// resolved to identifiers.
pub fn build(row: &Row, label_ids: BTreeSet<String>, agent_ids: BTreeSet<String>) -> TestSpec {
    let test_type = row.test_type;
    let task_names = tasks(test_type, row);
    let mut settings = TestSettings {
        period: Some(row.params.period.unwrap_or(match test_type {
            TestType::PageLoad => DEFAULT_PAGE_LOAD_PERIOD_SECS,
            _ => DEFAULT_PERIOD_SECS,
        })),
        family: Some("IP_FAMILY_DUAL".to_string()),
        health_settings: Some(health(test_type)),
        ..Default::default()
    };
    if task_names.iter().any(|t| t == "ping") {
        settings.ping = Some(ping(row));
    }
    if task_names.iter().any(|t| t == "traceroute") {
        settings.trace = Some(trace(row));
    }
    settings.tasks = task_names;

    let target = row.target.clone();
    match test_type {
        TestType::Ip => {
            settings.ip = Some(IpTest {
                targets: target
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
                use_local_ip: None,
            });
        }
        TestType::Hostname => settings.hostname = Some(HostnameTest { target: target.clone() }),
        TestType::Url => {
            settings.url = Some(UrlTest {
                target: target.clone(),
                timeout: Some(URL_TIMEOUT_MS),
                method: Some("GET".to_string()),
                ignore_tls_errors: Some(false),
            })
        }
        TestType::PageLoad => {
            settings.page_load = Some(PageLoadTest {
                target: target.clone(),
                timeout: Some(PAGE_LOAD_TIMEOUT_MS),
                ignore_tls_errors: Some(false),
            })
        }
        TestType::Dns | TestType::DnsGrid => {
            let dns = DnsTest {
                target: target.clone(),
                record_type: Some(row.params.dns_record_type.unwrap_or(DnsRecord::A)),
                servers: row.params.dns_servers.clone(),
                port: Some(row.params.dns_port.unwrap_or(DEFAULT_DNS_PORT)),
            };
            if test_type == TestType::Dns {
                settings.dns = Some(dns);
            } else {
                settings.dns_grid = Some(dns);
            }
        }
    }

    TestSpec {
        name: row.name.clone(),
        test_type,
        // IP targets are normalised the same way the remote projection joins them.
        target: settings.target_for(test_type).unwrap_or(target),
        label_ids,
        agent_ids,
        settings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SpecRecord;

    fn row(test_type: &str, target: &str, extra: impl FnOnce(&mut SpecRecord)) -> Row {
        let mut record = SpecRecord {
            test_name: Some("t".to_string()),
            test_type: Some(test_type.to_string()),
            target: Some(target.to_string()),
            ..Default::default()
        };
        extra(&mut record);
        Row::parse(&record, 2, "csv-managed").unwrap()
    }

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dns_port_defaults_to_53_never_zero() {
        let spec = build(
            &row("dns", "example.com", |r| r.dns_port = Some("0".into())),
            ids(&[]),
            ids(&["ag1"]),
        );
        let dns = spec.settings.dns.as_ref().unwrap();
        assert_eq!(dns.port, Some(53));
        assert_eq!(dns.record_type, Some(DnsRecord::A));
        assert_eq!(dns.servers, vec!["8.8.8.8", "1.1.1.1"]);
        assert_eq!(spec.settings.tasks, vec!["dns"]);
        assert!(spec.settings.ping.is_none());
    }

    #[test]
    fn test_page_load_defaults() {
        let spec = build(&row("page_load", "https://example.com", |_| {}), ids(&[]), ids(&["a"]));
        assert_eq!(spec.settings.period, Some(300));
        assert_eq!(spec.settings.page_load.as_ref().unwrap().timeout, Some(60_000));
        assert_eq!(spec.settings.tasks, vec!["page-load", "ping", "traceroute"]);
        let health = spec.settings.health_settings.as_ref().unwrap();
        assert_eq!(health.http_valid_codes.as_ref().unwrap().len(), 7);
    }

    #[test]
    fn test_dns_grid_only_adds_declared_probes() {
        let spec = build(
            &row("dns_grid", "example.com", |r| r.ping_count = Some("5".into())),
            ids(&[]),
            ids(&["a"]),
        );
        assert_eq!(spec.settings.tasks, vec!["dns", "ping"]);
        assert_eq!(spec.settings.ping.as_ref().unwrap().count, Some(5));
        assert!(spec.settings.dns_grid.is_some());
        assert!(spec.settings.dns.is_none());
    }

    #[test]
    fn test_ip_targets_are_split_and_normalised() {
        let spec = build(&row("ip", "10.0.0.1, 10.0.0.2", |_| {}), ids(&[]), ids(&["a"]));
        assert_eq!(spec.settings.ip.as_ref().unwrap().targets, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(spec.target, "10.0.0.1,10.0.0.2");
    }

    #[test]
    fn test_wire_form_carries_sorted_ids() {
        let spec = build(
            &row("hostname", "example.com", |_| {}),
            ids(&["L2", "L1"]),
            ids(&["b", "a"]),
        );
        let wire = spec.to_wire();
        assert_eq!(wire.test_type, "hostname");
        assert_eq!(wire.labels, vec!["L1", "L2"]);
        assert_eq!(wire.settings.agent_ids, vec!["a", "b"]);
        assert_eq!(wire.settings.period, Some(60));
        assert!(wire.id.is_none());
        assert!(wire.status.is_none());
    }
}
