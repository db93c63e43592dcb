//! The boundary between the reconciliation engine and the remote service.
//!
//! Every remote query and mutation goes through [`Gateway`]. Implementations
//! own transport concerns (authentication, pacing, retry with backoff); the
//! engine only sees a typed entity or a [`GatewayError`] once retries are
//! exhausted.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::models::{Agent, Label, Site, Test, TestStatus};

pub mod http;
pub mod memory;
pub mod wire;

pub use http::{HttpGateway, HttpGatewayConfig};
pub use memory::{Failure, FailureKind, GatewayCall, MemoryGateway};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfiguration(String),
}

impl GatewayError {
    /// True for failures of the transport itself, as opposed to the service
    /// answering and refusing the request.
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Network(_) | GatewayError::Exhausted { .. })
    }
}

/// Remote operations, used for call accounting and failure injection.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOp {
    ListLabels,
    CreateLabel,
    ListSites,
    CreateSite,
    ListAgents,
    ListTests,
    CreateTest,
    UpdateTest,
    DeleteTest,
    SetTestStatus,
}

impl GatewayOp {
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            GatewayOp::ListLabels
                | GatewayOp::ListSites
                | GatewayOp::ListAgents
                | GatewayOp::ListTests
        )
    }
}

impl fmt::Display for GatewayOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GatewayOp::ListLabels => "listLabels",
            GatewayOp::CreateLabel => "createLabel",
            GatewayOp::ListSites => "listSites",
            GatewayOp::CreateSite => "createSite",
            GatewayOp::ListAgents => "listAgents",
            GatewayOp::ListTests => "listTests",
            GatewayOp::CreateTest => "createTest",
            GatewayOp::UpdateTest => "updateTest",
            GatewayOp::DeleteTest => "deleteTest",
            GatewayOp::SetTestStatus => "setTestStatus",
        };
        f.write_str(name)
    }
}

/// The remote monitoring service, as seen by the engine.
///
/// Calls are awaited one at a time by the engine; implementations may pace
/// and retry internally but must return only after retries are exhausted.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn list_labels(&self) -> Result<Vec<Label>, GatewayError>;
    async fn create_label(&self, label: &Label) -> Result<Label, GatewayError>;

    async fn list_sites(&self) -> Result<Vec<Site>, GatewayError>;
    async fn create_site(&self, site: &Site) -> Result<Site, GatewayError>;

    async fn list_agents(&self) -> Result<Vec<Agent>, GatewayError>;

    async fn list_tests(&self) -> Result<Vec<Test>, GatewayError>;
    async fn create_test(&self, test: &Test) -> Result<Test, GatewayError>;
    /// Full-object replace of the test identified by `id`.
    async fn update_test(&self, id: &str, test: &Test) -> Result<Test, GatewayError>;
    async fn delete_test(&self, id: &str) -> Result<(), GatewayError>;
    async fn set_test_status(&self, id: &str, status: TestStatus) -> Result<(), GatewayError>;
}
