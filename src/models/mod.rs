//! Wire shapes of the entities held by the remote monitoring service.
//!
//! Field names follow the service's camelCase JSON. Server-owned fields
//! (`id`, `cdate`, `edate`, `status`) are optional so the same structs can
//! be used for create requests and for list responses.

pub mod agent;
pub mod label;
pub mod site;

pub use agent::{Agent, AgentClass};
pub use label::Label;
pub use site::{PostalAddress, Site, SiteType};
pub use test::{
    ActivationSettings, DnsRecord, DnsTest, HealthSettings, HostnameTest, IpTest, PageLoadTest,
    PingSettings, Test, TestSettings, TestStatus, TestType, TraceSettings, UrlTest,
};
