use serde::{Deserialize, Serialize};

/// Column order of written specification files.
pub const COLUMNS: [&str; 24] = [
    "test_name",
    "test_type",
    "target",
    "site_name",
    "site_type",
    "site_lat",
    "site_lon",
    "site_address",
    "site_city",
    "site_region",
    "site_country",
    "site_postal_code",
    "labels",
    "agent_names",
    "dns_servers",
    "dns_port",
    "dns_record_type",
    "period",
    "ping_count",
    "ping_protocol",
    "ping_port",
    "trace_count",
    "trace_protocol",
    "trace_limit",
];

/// One line of the specification file, column for column. Empty cells
/// deserialize to `None`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SpecRecord {
    pub test_name: Option<String>,
    pub test_type: Option<String>,
    pub target: Option<String>,
    pub site_name: Option<String>,
    pub site_type: Option<String>,
    pub site_lat: Option<String>,
    pub site_lon: Option<String>,
    pub site_address: Option<String>,
    pub site_city: Option<String>,
    pub site_region: Option<String>,
    pub site_country: Option<String>,
    pub site_postal_code: Option<String>,
    pub labels: Option<String>,
    pub agent_names: Option<String>,
    pub dns_servers: Option<String>,
    pub dns_port: Option<String>,
    pub dns_record_type: Option<String>,
    pub period: Option<String>,
    pub ping_count: Option<String>,
    pub ping_protocol: Option<String>,
    pub ping_port: Option<String>,
    pub trace_count: Option<String>,
    pub trace_protocol: Option<String>,
    pub trace_limit: Option<String>,
}

impl SpecRecord {
    /// The trimmed test name, if the cell is not blank.
    pub fn name(&self) -> Option<&str> {
        self.test_name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}
