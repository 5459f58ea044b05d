//! Request/response client for the orchestration server.
//!
//! DESIGN
//! ======
//! `RemoteApi` is the seam the coordinator talks through; `HttpApi` is the
//! reqwest implementation and tests substitute an in-process mock. Each call
//! is send, read status, read body, then hand the body to a pure `parse_*`
//! function so response handling is testable without a server.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::types::{
    AgentQueryRequest, AgentRecord, BroadcastResult, ConnectionCreated, ConnectionRecord, CreateAgentRequest,
    HealthReport, MessageBroadcastRequest, MessageLog, MessageRouteRequest, QueryResponse, RouteResponse,
    UpdateAgentRequest, WorkflowRequest, WorkflowResult,
};
use crate::config::SyncConfig;
use crate::error::ErrorCode;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response (DNS, connect, timeout).
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// The server answered with a non-success status.
    #[error("{detail} (status {status})")]
    ApiResponse { status: u16, detail: String },

    /// The response body could not be deserialized.
    #[error("API response parse failed: {0}")]
    ApiParse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ApiRequest(_) => "E_API_REQUEST",
            Self::ApiResponse { .. } => "E_API_RESPONSE",
            Self::ApiParse(_) => "E_API_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ApiRequest(_) | Self::ApiResponse { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// SEAM
// =============================================================================

/// Authoritative operations exposed by the orchestration server.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<AgentRecord>, ApiError>;
    async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord, ApiError>;
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<AgentRecord, ApiError>;
    async fn update_agent(&self, agent_id: &str, request: &UpdateAgentRequest) -> Result<AgentRecord, ApiError>;
    async fn delete_agent(&self, agent_id: &str) -> Result<(), ApiError>;
    async fn start_agent(&self, agent_id: &str) -> Result<(), ApiError>;
    async fn stop_agent(&self, agent_id: &str) -> Result<(), ApiError>;
    async fn query_agent(&self, agent_id: &str, request: &AgentQueryRequest) -> Result<QueryResponse, ApiError>;

    async fn list_connections(&self) -> Result<Vec<ConnectionRecord>, ApiError>;
    /// Create a connection. The client supplies the id in `connection.id`.
    async fn create_connection(&self, connection: &ConnectionRecord) -> Result<ConnectionCreated, ApiError>;
    async fn delete_connection(&self, connection_id: &str) -> Result<(), ApiError>;

    async fn route_message(&self, request: &MessageRouteRequest) -> Result<RouteResponse, ApiError>;
    async fn broadcast_message(&self, request: &MessageBroadcastRequest) -> Result<BroadcastResult, ApiError>;
    async fn message_history(&self, limit: usize) -> Result<MessageLog, ApiError>;
    async fn execute_workflow(&self, request: &WorkflowRequest) -> Result<WorkflowResult, ApiError>;
    async fn health(&self) -> Result<HealthReport, ApiError>;
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    /// Build a client for `base_url` with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::HttpClientBuild`] if reqwest rejects the settings.
    pub fn new(base_url: &str, request_timeout: Duration, connect_timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    /// # Errors
    ///
    /// Returns [`ApiError::HttpClientBuild`] if reqwest rejects the settings.
    pub fn from_config(config: &SyncConfig) -> Result<Self, ApiError> {
        Self::new(&config.base_url, config.request_timeout, config.connect_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<String, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::ApiRequest(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::ApiRequest(e.to_string()))?;

        check_status(status, &text)?;
        Ok(text)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let text = self.execute(self.http.get(self.url(path))).await?;
        parse_json(&text)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: serde::Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let text = self.execute(self.http.post(self.url(path)).json(body)).await?;
        parse_json(&text)
    }

    async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        self.execute(self.http.post(self.url(path))).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(self.http.delete(self.url(path))).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn list_agents(&self) -> Result<Vec<AgentRecord>, ApiError> {
        self.get_json("/agents").await
    }

    async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord, ApiError> {
        self.get_json(&format!("/agents/{agent_id}")).await
    }

    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<AgentRecord, ApiError> {
        self.post_json("/agents", request).await
    }

    async fn update_agent(&self, agent_id: &str, request: &UpdateAgentRequest) -> Result<AgentRecord, ApiError> {
        let builder = self.http.put(self.url(&format!("/agents/{agent_id}"))).json(request);
        let text = self.execute(builder).await?;
        parse_json(&text)
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/agents/{agent_id}")).await
    }

    async fn start_agent(&self, agent_id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("/agents/{agent_id}/start")).await
    }

    async fn stop_agent(&self, agent_id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("/agents/{agent_id}/stop")).await
    }

    async fn query_agent(&self, agent_id: &str, request: &AgentQueryRequest) -> Result<QueryResponse, ApiError> {
        self.post_json(&format!("/agents/{agent_id}/query"), request).await
    }

    async fn list_connections(&self) -> Result<Vec<ConnectionRecord>, ApiError> {
        self.get_json("/connections").await
    }

    async fn create_connection(&self, connection: &ConnectionRecord) -> Result<ConnectionCreated, ApiError> {
        self.post_json("/connections", connection).await
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/connections/{connection_id}")).await
    }

    async fn route_message(&self, request: &MessageRouteRequest) -> Result<RouteResponse, ApiError> {
        self.post_json("/messages/route", request).await
    }

    async fn broadcast_message(&self, request: &MessageBroadcastRequest) -> Result<BroadcastResult, ApiError> {
        self.post_json("/messages/broadcast", request).await
    }

    async fn message_history(&self, limit: usize) -> Result<MessageLog, ApiError> {
        self.get_json(&format!("/messages/history?limit={limit}")).await
    }

    async fn execute_workflow(&self, request: &WorkflowRequest) -> Result<WorkflowResult, ApiError> {
        self.post_json("/workflows/execute", request).await
    }

    async fn health(&self) -> Result<HealthReport, ApiError> {
        self.get_json("/health").await
    }
}

// =============================================================================
// PARSING
// =============================================================================

#[derive(serde::Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

fn check_status(status: u16, body: &str) -> Result<(), ApiError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    Err(ApiError::ApiResponse { status, detail: error_detail(status, body) })
}

/// Extract the human-readable message from an error body.
///
/// Servers reply `{"detail": "..."}`; validation failures put a structured
/// value under `detail`, which is rendered as compact JSON. Anything else
/// falls back to the raw body, or the bare status when the body is empty.
fn error_detail(status: u16, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return match parsed.detail {
            serde_json::Value::String(detail) => detail,
            other => other.to_string(),
        };
    }
    let trimmed = body.trim();
    if trimmed.is_empty() { format!("request failed with status {status}") } else { trimmed.to_owned() }
}

fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    serde_json::from_str(text).map_err(|e| ApiError::ApiParse(e.to_string()))
}
