//! JSON envelopes used by the HTTP API.

use serde::{Deserialize, Serialize};

use crate::models::{Agent, Label, Site, Test, TestStatus};

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListTestsResponse {
    #[serde(default)]
    pub tests: Vec<Test>,
    #[serde(default)]
    pub invalid_count: Option<u32>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentsResponse {
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub invalid_count: Option<u32>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListLabelsResponse {
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub invalid_count: Option<u32>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListSitesResponse {
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default)]
    pub invalid_count: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TestEnvelope {
    pub test: Test,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LabelEnvelope {
    pub label: Label,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SiteEnvelope {
    pub site: Site,
}

#[derive(Serialize, Debug)]
pub struct SetTestStatusRequest<'a> {
    pub id: &'a str,
    pub status: TestStatus,
}

/// Body of responses that carry nothing, such as deletes.
#[derive(Deserialize, Debug, Default)]
pub struct Empty {}
