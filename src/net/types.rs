//! Wire records exchanged with the orchestration server.
//!
//! Records are decoded leniently: optional fields default when absent so a
//! server that adds or omits attributes never breaks the client. Secrets the
//! server echoes back inside agent configs are dropped on decode.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_AGENT_KIND: &str = "SingleAgent";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

// =============================================================================
// AGENTS
// =============================================================================

/// Lifecycle status reported by the server for an agent process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Error,
    Stopping,
}

impl AgentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Error => "error",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration block nested inside an agent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            kind: default_kind(),
            port: None,
            model: default_model(),
            prompt: None,
        }
    }
}

/// Authoritative agent record as broadcast or returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    #[serde(default)]
    pub config: AgentConfig,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub last_health_check: Option<String>,
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// Authoritative directed relation between two agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    #[serde(default)]
    pub from_handle: Option<String>,
    #[serde(default)]
    pub to_handle: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionCreated {
    #[serde(default)]
    pub status: String,
    pub connection_id: String,
}

// =============================================================================
// REQUESTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub openai_api_key: String,
}

impl CreateAgentRequest {
    #[must_use]
    pub fn new(name: impl Into<String>, openai_api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DEFAULT_AGENT_KIND.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            prompt: None,
            openai_api_key: openai_api_key.into(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// Partial agent update; `None` fields are left untouched by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateAgentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentQueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRouteRequest {
    pub from_agent: String,
    pub to_agent: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Send one message along every outgoing connection of `from_agent`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageBroadcastRequest {
    pub from_agent: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// One routed message per outgoing connection; empty when there are none.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BroadcastResult {
    #[serde(default)]
    pub results: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRequest {
    pub workflow_id: String,
    pub agents: Vec<String>,
    pub connections: Vec<ConnectionRecord>,
    pub initial_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

// =============================================================================
// RESPONSES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub agent_id: String,
    pub step: u32,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    #[serde(default)]
    pub initial_message: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub final_result: Option<String>,
    #[serde(default)]
    pub status: String,
}

/// Opaque JSON bodies the client only passes through.
pub type QueryResponse = Value;
pub type RouteResponse = Value;
pub type MessageLog = Vec<Value>;
pub type HealthReport = Value;

fn default_kind() -> String {
    DEFAULT_AGENT_KIND.to_owned()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_owned()
}

fn default_enabled() -> bool {
    true
}
