//! Writes remote tests back out as specification records, so an exported
//! file can be edited and applied again.

use tracing::{debug, info};

use super::record::SpecRecord;
use crate::models::{SiteType, TestStatus};
use crate::reconcile::{ExistingTest, ResourceCache};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub management_tag: String,
    /// Export only tests carrying the management tag.
    pub only_managed: bool,
    pub include_paused: bool,
}

fn site_type_name(site_type: SiteType) -> &'static str {
    match site_type {
        SiteType::Unspecified => "unspecified",
        SiteType::DataCenter => "data_center",
        SiteType::Branch => "branch",
        SiteType::ConnectivityNode => "connectivity_node",
        SiteType::Cloud => "cloud",
        SiteType::RemoteWorker => "remote_worker",
    }
}

fn join<I: IntoIterator<Item = String>>(items: I) -> Option<String> {
    let joined = items.into_iter().collect::<Vec<_>>().join(",");
    Some(joined).filter(|s| !s.is_empty())
}

fn to_record(
    test: &ExistingTest,
    cache: &ResourceCache,
    management_tag: &str,
) -> Option<SpecRecord> {
    let Some(kind) = test.test.kind() else {
        debug!(
            test = %test.name(),
            test_type = %test.test.test_type,
            "Skipping test of unmanaged type."
        );
        return None;
    };
    let settings = &test.test.settings;

    let labels = test
        .test
        .labels
        .iter()
        .filter_map(|id| cache.label_name(id))
        .filter(|name| *name != management_tag)
        .map(str::to_string);

    let agents: Vec<_> = settings
        .agent_ids
        .iter()
        .map(|id| cache.agent_by_id(id))
        .collect();
    let agent_names = settings
        .agent_ids
        .iter()
        .zip(&agents)
        .map(|(id, agent)| {
            agent
                .map(|a| a.display_name().to_string())
                .unwrap_or_else(|| id.clone())
        });

    let site_name = agents
        .iter()
        .flatten()
        .next()
        .and_then(|a| a.site_name.clone());
    let site = site_name.as_deref().and_then(|name| cache.site(name));
    let address = site.and_then(|s| s.postal_address.clone()).unwrap_or_default();

    let mut record = SpecRecord {
        test_name: Some(test.name().to_string()),
        test_type: Some(kind.as_str().to_string()),
        target: settings.target_for(kind),
        site_name,
        site_type: site.map(|s| site_type_name(s.site_type).to_string()),
        site_lat: site.and_then(|s| s.lat).map(|v| v.to_string()),
        site_lon: site.and_then(|s| s.lon).map(|v| v.to_string()),
        site_address: address.address,
        site_city: address.city,
        site_region: address.region,
        site_country: address.country,
        site_postal_code: address.postal_code,
        labels: join(labels),
        agent_names: join(agent_names),
        period: settings.period.map(|p| p.to_string()),
        ..Default::default()
    };

    if let Some(dns) = settings.dns_for(kind) {
        record.dns_servers = join(dns.servers.iter().cloned());
        record.dns_port = dns.port.filter(|p| *p != 0).map(|p| p.to_string());
        record.dns_record_type = dns.record_type.map(|r| r.to_string());
    }
    if let Some(ping) = &settings.ping {
        record.ping_count = ping.count.map(|v| v.to_string());
        record.ping_protocol = ping.protocol.clone();
        record.ping_port = ping.port.map(|v| v.to_string());
    }
    if let Some(trace) = &settings.trace {
        record.trace_count = trace.count.map(|v| v.to_string());
        record.trace_protocol = trace.protocol.clone();
        record.trace_limit = trace.limit.map(|v| v.to_string());
    }
    Some(record)
}

/// Records for the selected cached tests, sorted by name.
pub fn export_records(cache: &ResourceCache, options: &ExportOptions) -> Vec<SpecRecord> {
    let mut tests: Vec<&ExistingTest> = if options.only_managed {
        cache.tests_tagged(&options.management_tag)
    } else {
        cache.tests().collect()
    };
    tests.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id.cmp(&b.id)));

    let records: Vec<SpecRecord> = tests
        .into_iter()
        .filter(|t| options.include_paused || t.test.status != Some(TestStatus::Paused))
        .filter_map(|t| to_record(t, cache, &options.management_tag))
        .collect();
    info!(
        exported = records.len(),
        only_managed = options.only_managed,
        "Exported tests as specification records."
    );
    records
}
