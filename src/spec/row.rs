use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

use super::record::SpecRecord;
use crate::models::{DnsRecord, PostalAddress, SiteType, TestType};

pub const DEFAULT_SITE_NAME: &str = "Default Site";
pub const DEFAULT_DNS_SERVERS: [&str; 2] = ["8.8.8.8", "1.1.1.1"];
pub const DEFAULT_LABEL_COLOR: &str = "#0066CC";
pub const MANAGEMENT_LABEL_COLOR: &str = "#00FF00";
pub const MANAGEMENT_LABEL_DESCRIPTION: &str = "CSV managed tests";

const PING_PROTOCOLS: [&str; 2] = ["icmp", "tcp"];
const TRACE_PROTOCOLS: [&str; 3] = ["icmp", "tcp", "udp"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructuralError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid value '{value}' for '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("duplicate test name '{name}' (first declared on line {first_line})")]
    DuplicateName { name: String, first_line: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelSpec {
    pub name: String,
    pub color: String,
    pub description: String,
}

impl LabelSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            color: DEFAULT_LABEL_COLOR.to_string(),
            description: format!("Auto-created label: {}", name),
        }
    }

    pub fn management(tag: &str) -> Self {
        Self {
            name: tag.to_string(),
            color: MANAGEMENT_LABEL_COLOR.to_string(),
            description: MANAGEMENT_LABEL_DESCRIPTION.to_string(),
        }
    }

    /// Parses `name`, `name|color` or `name|color|description`.
    fn parse(entry: &str) -> Option<Self> {
        let mut parts = entry.split('|').map(str::trim);
        let name = parts.next().filter(|n| !n.is_empty())?;
        let mut label = LabelSpec::new(name);
        if let Some(color) = parts.next().filter(|c| !c.is_empty()) {
            label.color = color.to_string();
        }
        if let Some(description) = parts.next().filter(|d| !d.is_empty()) {
            label.description = description.to_string();
        }
        Some(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteSpec {
    pub name: String,
    pub site_type: SiteType,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub address: PostalAddress,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingParams {
    pub count: Option<u32>,
    pub protocol: Option<String>,
    pub port: Option<u16>,
}

impl PingParams {
    pub fn is_set(&self) -> bool {
        self.count.is_some() || self.protocol.is_some() || self.port.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceParams {
    pub count: Option<u32>,
    pub protocol: Option<String>,
    pub limit: Option<u32>,
}

impl TraceParams {
    pub fn is_set(&self) -> bool {
        self.count.is_some() || self.protocol.is_some() || self.limit.is_some()
    }
}

/// Type-specific parameters as declared. Type defaults are applied when
/// the row is built into a test.
#[derive(Debug, Clone, PartialEq)]
pub struct TestParams {
    pub dns_servers: Vec<String>,
    /// `None` when the cell is empty or `0`.
    pub dns_port: Option<u16>,
    pub dns_record_type: Option<DnsRecord>,
    pub period: Option<u32>,
    pub ping: PingParams,
    pub trace: TraceParams,
}

/// One desired test, parsed from a [`SpecRecord`]. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub line: usize,
    pub name: String,
    pub test_type: TestType,
    pub target: String,
    pub site: SiteSpec,
    /// Declared labels followed by the management label, without duplicates.
    pub labels: Vec<LabelSpec>,
    pub agent_names: Vec<String>,
    pub params: TestParams,
}

fn cell(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, StructuralError> {
    cell(value).ok_or(StructuralError::MissingField(field))
}

fn number<T>(value: &Option<String>, field: &'static str) -> Result<Option<T>, StructuralError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    cell(value)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| StructuralError::InvalidField {
                field,
                value: raw.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn protocol(
    value: &Option<String>,
    field: &'static str,
    allowed: &[&str],
) -> Result<Option<String>, StructuralError> {
    match cell(value) {
        None => Ok(None),
        Some(raw) => {
            let normalized = raw.to_ascii_lowercase();
            if allowed.contains(&normalized.as_str()) {
                Ok(Some(normalized))
            } else {
                Err(StructuralError::InvalidField {
                    field,
                    value: raw.to_string(),
                    reason: format!("expected one of {}", allowed.join(", ")),
                })
            }
        }
    }
}

fn list(value: &Option<String>) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in cell(value).unwrap_or_default().split(',').map(str::trim) {
        if !item.is_empty() && !items.iter().any(|existing| existing == item) {
            items.push(item.to_string());
        }
    }
    items
}

impl Row {
    pub fn parse(
        record: &SpecRecord,
        line: usize,
        management_tag: &str,
    ) -> Result<Row, StructuralError> {
        let name = required(&record.test_name, "test_name")?.to_string();
        let raw_type = required(&record.test_type, "test_type")?;
        let test_type: TestType = raw_type.parse().map_err(|reason| StructuralError::InvalidField {
            field: "test_type",
            value: raw_type.to_string(),
            reason,
        })?;
        let target = required(&record.target, "target")?.to_string();

        let site_name = cell(&record.site_name).unwrap_or(DEFAULT_SITE_NAME).to_string();
        let site_type = match cell(&record.site_type) {
            None => SiteType::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(line, site_type = raw, "Unknown site type, using data center.");
                SiteType::DataCenter
            }),
        };
        let site = SiteSpec {
            name: site_name,
            site_type,
            lat: number(&record.site_lat, "site_lat")?,
            lon: number(&record.site_lon, "site_lon")?,
            address: PostalAddress {
                address: cell(&record.site_address).map(str::to_string),
                city: cell(&record.site_city).map(str::to_string),
                region: cell(&record.site_region).map(str::to_string),
                postal_code: cell(&record.site_postal_code).map(str::to_string),
                country: cell(&record.site_country).map(str::to_string),
            },
        };

        let mut labels: Vec<LabelSpec> = Vec::new();
        for entry in cell(&record.labels).unwrap_or_default().split(',') {
            if let Some(label) = LabelSpec::parse(entry) {
                if !labels.iter().any(|l| l.name == label.name) {
                    labels.push(label);
                }
            }
        }
        if !labels.iter().any(|l| l.name == management_tag) {
            labels.push(LabelSpec::management(management_tag));
        }

        let mut dns_servers = list(&record.dns_servers);
        if dns_servers.is_empty() {
            dns_servers = DEFAULT_DNS_SERVERS.iter().map(|s| s.to_string()).collect();
        }

        let dns_record_type = match cell(&record.dns_record_type) {
            None => None,
            Some(raw) => Some(raw.parse().map_err(|reason| StructuralError::InvalidField {
                field: "dns_record_type",
                value: raw.to_string(),
                reason,
            })?),
        };

        let period: Option<u32> = number(&record.period, "period")?;
        if period == Some(0) {
            return Err(StructuralError::InvalidField {
                field: "period",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let params = TestParams {
            dns_servers,
            dns_port: number::<u16>(&record.dns_port, "dns_port")?.filter(|port| *port != 0),
            dns_record_type,
            period,
            ping: PingParams {
                count: number(&record.ping_count, "ping_count")?,
                protocol: protocol(&record.ping_protocol, "ping_protocol", &PING_PROTOCOLS)?,
                port: number(&record.ping_port, "ping_port")?,
            },
            trace: TraceParams {
                count: number(&record.trace_count, "trace_count")?,
                protocol: protocol(&record.trace_protocol, "trace_protocol", &TRACE_PROTOCOLS)?,
                limit: number(&record.trace_limit, "trace_limit")?,
            },
        };

        Ok(Row {
            line,
            name,
            test_type,
            target,
            site,
            labels,
            agent_names: list(&record.agent_names),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, test_type: &str, target: &str) -> SpecRecord {
        SpecRecord {
            test_name: Some(name.to_string()),
            test_type: Some(test_type.to_string()),
            target: Some(target.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_minimal_row_gets_source_defaults() {
        let row = Row::parse(&record("A", "dns", "example.com"), 2, "csv-managed").unwrap();
        assert_eq!(row.test_type, TestType::Dns);
        assert_eq!(row.site.name, DEFAULT_SITE_NAME);
        assert_eq!(row.site.site_type, SiteType::DataCenter);
        assert_eq!(row.labels, vec![LabelSpec::management("csv-managed")]);
        assert_eq!(row.params.dns_servers, vec!["8.8.8.8", "1.1.1.1"]);
        assert_eq!(row.params.dns_port, None);
        assert!(row.agent_names.is_empty());
    }

    #[test]
    fn test_missing_required_fields() {
        let mut rec = record("A", "dns", "example.com");
        rec.target = Some("   ".to_string());
        assert_eq!(
            Row::parse(&rec, 2, "t"),
            Err(StructuralError::MissingField("target"))
        );
        rec = record("", "dns", "x");
        assert_eq!(
            Row::parse(&rec, 2, "t"),
            Err(StructuralError::MissingField("test_name"))
        );
    }

    #[test]
    fn test_unknown_type_is_invalid() {
        let err = Row::parse(&record("A", "smoke-signal", "x"), 2, "t").unwrap_err();
        assert!(matches!(err, StructuralError::InvalidField { field: "test_type", .. }));
    }

    #[test]
    fn test_zero_dns_port_means_unset() {
        let mut rec = record("A", "dns", "example.com");
        rec.dns_port = Some("0".to_string());
        assert_eq!(Row::parse(&rec, 2, "t").unwrap().params.dns_port, None);
        rec.dns_port = Some("5353".to_string());
        assert_eq!(Row::parse(&rec, 2, "t").unwrap().params.dns_port, Some(5353));
        rec.dns_port = Some("70000".to_string());
        assert!(matches!(
            Row::parse(&rec, 2, "t"),
            Err(StructuralError::InvalidField { field: "dns_port", .. })
        ));
    }

    #[test]
    fn test_labels_with_color_and_description() {
        let mut rec = record("A", "hostname", "example.com");
        rec.labels = Some("prod|#FF0000|Production, edge , csv-managed".to_string());
        let row = Row::parse(&rec, 2, "csv-managed").unwrap();
        let names: Vec<&str> = row.labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["prod", "edge", "csv-managed"]);
        assert_eq!(row.labels[0].color, "#FF0000");
        assert_eq!(row.labels[0].description, "Production");
        assert_eq!(row.labels[1].color, DEFAULT_LABEL_COLOR);
        assert_eq!(row.labels[1].description, "Auto-created label: edge");
        // Declared explicitly, so it keeps the row's color rather than the management one.
        assert_eq!(row.labels[2].color, DEFAULT_LABEL_COLOR);
    }

    #[test]
    fn test_agent_names_are_trimmed_and_deduplicated() {
        let mut rec = record("A", "ip", "10.0.0.1");
        rec.agent_names = Some(" ag1, ag2 ,ag1,".to_string());
        let row = Row::parse(&rec, 2, "t").unwrap();
        assert_eq!(row.agent_names, vec!["ag1", "ag2"]);
    }

    #[test]
    fn test_protocol_validation() {
        let mut rec = record("A", "ip", "10.0.0.1");
        rec.ping_protocol = Some("TCP".to_string());
        rec.trace_protocol = Some("udp".to_string());
        let row = Row::parse(&rec, 2, "t").unwrap();
        assert_eq!(row.params.ping.protocol.as_deref(), Some("tcp"));
        assert_eq!(row.params.trace.protocol.as_deref(), Some("udp"));

        rec.ping_protocol = Some("udp".to_string());
        assert!(matches!(
            Row::parse(&rec, 2, "t"),
            Err(StructuralError::InvalidField { field: "ping_protocol", .. })
        ));
    }

    #[test]
    fn test_unknown_site_type_falls_back_to_data_center() {
        let mut rec = record("A", "url", "https://example.com");
        rec.site_type = Some("moonbase".to_string());
        rec.site_name = Some("S1".to_string());
        rec.site_lat = Some("52.5".to_string());
        let row = Row::parse(&rec, 2, "t").unwrap();
        assert_eq!(row.site.site_type, SiteType::DataCenter);
        assert_eq!(row.site.lat, Some(52.5));
        assert_eq!(row.site.lon, None);
    }
}
