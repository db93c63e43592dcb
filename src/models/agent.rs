use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A monitoring agent. Agents are never created or modified by this tool,
/// only selected to run tests.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    /// `private` or `global`.
    #[serde(rename = "type", default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl Agent {
    /// Alias if the agent has one, otherwise its id.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.id)
    }
}

/// Capability class used as the agent eligibility filter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentClass {
    /// Agents operated by the account itself.
    #[default]
    Private,
    /// Agents shared by every account of the service.
    Global,
    Any,
}

impl AgentClass {
    pub fn admits(&self, agent: &Agent) -> bool {
        let agent_type = agent.agent_type.as_deref().unwrap_or_default();
        match self {
            AgentClass::Private => agent_type.eq_ignore_ascii_case("private"),
            AgentClass::Global => agent_type.eq_ignore_ascii_case("global"),
            AgentClass::Any => true,
        }
    }
}

impl fmt::Display for AgentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentClass::Private => write!(f, "private"),
            AgentClass::Global => write!(f, "global"),
            AgentClass::Any => write!(f, "any"),
        }
    }
}

impl FromStr for AgentClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(AgentClass::Private),
            "global" => Ok(AgentClass::Global),
            "any" | "all" => Ok(AgentClass::Any),
            other => Err(format!("unknown agent class '{other}'")),
        }
    }
}
