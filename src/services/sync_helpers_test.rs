//! In-process `RemoteApi` double shared by the service tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use super::sync::SyncClient;
use crate::config::StreamConfig;
use crate::net::api::{ApiError, RemoteApi};
use crate::net::stream::StreamManager;
use crate::net::types::{
    AgentConfig, AgentQueryRequest, AgentRecord, AgentStatus, BroadcastResult, ConnectionCreated, ConnectionRecord,
    CreateAgentRequest, HealthReport, MessageBroadcastRequest, MessageLog, MessageRouteRequest, QueryResponse,
    RouteResponse, UpdateAgentRequest, WorkflowRequest, WorkflowResult, WorkflowStep,
};
use crate::state::layout::PositionCache;

/// Scriptable server double. Operations can be forced to fail, or held
/// until [`MockApi::release`] so tests can observe optimistic state.
#[derive(Default)]
pub struct MockApi {
    pub agents: Mutex<Vec<AgentRecord>>,
    pub connections: Mutex<Vec<ConnectionRecord>>,
    failures: Mutex<HashMap<&'static str, ApiError>>,
    held: Mutex<HashSet<&'static str>>,
    release: Notify,
    calls: Mutex<Vec<&'static str>>,
    next_id: Mutex<u32>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_agents(ids: &[&str]) -> Arc<Self> {
        let api = Self::default();
        *api.agents.lock().unwrap() = ids.iter().map(|id| agent_record(id, AgentStatus::Running)).collect();
        Arc::new(api)
    }

    pub fn fail(&self, op: &'static str, error: ApiError) {
        self.failures.lock().unwrap().insert(op, error);
    }

    pub fn fail_status(&self, op: &'static str, status: u16, detail: &str) {
        self.fail(op, ApiError::ApiResponse { status, detail: detail.to_owned() });
    }

    pub fn hold(&self, op: &'static str) {
        self.held.lock().unwrap().insert(op);
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    async fn enter(&self, op: &'static str) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(op);
        let held = self.held.lock().unwrap().contains(op);
        if held {
            self.release.notified().await;
        }
        match self.failures.lock().unwrap().get(op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn not_found(what: &str, id: &str) -> ApiError {
        ApiError::ApiResponse { status: 404, detail: format!("{what} {id} not found") }
    }
}

pub fn agent_record(id: &str, status: AgentStatus) -> AgentRecord {
    AgentRecord {
        id: id.to_owned(),
        config: AgentConfig {
            id: id.to_owned(),
            name: format!("Agent {id}"),
            model: "gpt-4o".to_owned(),
            prompt: Some("be helpful".to_owned()),
            ..AgentConfig::default()
        },
        status,
        pid: None,
        url: None,
        error_message: None,
        last_health_check: None,
    }
}

pub fn connection_record(id: &str, from: &str, to: &str) -> ConnectionRecord {
    ConnectionRecord {
        id: id.to_owned(),
        from_agent: from.to_owned(),
        to_agent: to.to_owned(),
        from_handle: Some("right".to_owned()),
        to_handle: Some("left".to_owned()),
        enabled: true,
    }
}

/// Client wired to `api`, an in-memory layout cache and an idle stream.
pub fn test_client(api: Arc<MockApi>) -> SyncClient {
    let stream = StreamManager::new(StreamConfig::new("ws://127.0.0.1:9/ws"));
    SyncClient::new(api, stream, Arc::new(PositionCache::in_memory()))
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn list_agents(&self) -> Result<Vec<AgentRecord>, ApiError> {
        self.enter("list_agents").await?;
        Ok(self.agents.lock().unwrap().clone())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord, ApiError> {
        self.enter("get_agent").await?;
        let agents = self.agents.lock().unwrap();
        agents.iter().find(|a| a.id == agent_id).cloned().ok_or_else(|| Self::not_found("Agent", agent_id))
    }

    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<AgentRecord, ApiError> {
        self.enter("create_agent").await?;
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("agent-{next}")
        };
        let mut record = agent_record(&id, AgentStatus::Stopped);
        record.config.name.clone_from(&request.name);
        record.config.model.clone_from(&request.model);
        record.config.prompt.clone_from(&request.prompt);
        self.agents.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn update_agent(&self, agent_id: &str, request: &UpdateAgentRequest) -> Result<AgentRecord, ApiError> {
        self.enter("update_agent").await?;
        let mut agents = self.agents.lock().unwrap();
        let record = agents.iter_mut().find(|a| a.id == agent_id).ok_or_else(|| Self::not_found("Agent", agent_id))?;
        if let Some(name) = &request.name {
            record.config.name.clone_from(name);
        }
        if let Some(model) = &request.model {
            record.config.model.clone_from(model);
        }
        if request.prompt.is_some() {
            record.config.prompt.clone_from(&request.prompt);
        }
        Ok(record.clone())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), ApiError> {
        self.enter("delete_agent").await?;
        let mut agents = self.agents.lock().unwrap();
        let before = agents.len();
        agents.retain(|a| a.id != agent_id);
        if agents.len() == before {
            return Err(Self::not_found("Agent", agent_id));
        }
        Ok(())
    }

    async fn start_agent(&self, agent_id: &str) -> Result<(), ApiError> {
        self.enter("start_agent").await?;
        let mut agents = self.agents.lock().unwrap();
        let record = agents.iter_mut().find(|a| a.id == agent_id).ok_or_else(|| Self::not_found("Agent", agent_id))?;
        record.status = AgentStatus::Running;
        Ok(())
    }

    async fn stop_agent(&self, agent_id: &str) -> Result<(), ApiError> {
        self.enter("stop_agent").await?;
        let mut agents = self.agents.lock().unwrap();
        let record = agents.iter_mut().find(|a| a.id == agent_id).ok_or_else(|| Self::not_found("Agent", agent_id))?;
        record.status = AgentStatus::Stopped;
        Ok(())
    }

    async fn query_agent(&self, agent_id: &str, request: &AgentQueryRequest) -> Result<QueryResponse, ApiError> {
        self.enter("query_agent").await?;
        Ok(json!({"agent_id": agent_id, "response": format!("echo: {}", request.query)}))
    }

    async fn list_connections(&self) -> Result<Vec<ConnectionRecord>, ApiError> {
        self.enter("list_connections").await?;
        Ok(self.connections.lock().unwrap().clone())
    }

    async fn create_connection(&self, connection: &ConnectionRecord) -> Result<ConnectionCreated, ApiError> {
        self.enter("create_connection").await?;
        self.connections.lock().unwrap().push(connection.clone());
        Ok(ConnectionCreated { status: "connected".to_owned(), connection_id: connection.id.clone() })
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<(), ApiError> {
        self.enter("delete_connection").await?;
        let mut connections = self.connections.lock().unwrap();
        let before = connections.len();
        connections.retain(|c| c.id != connection_id);
        if connections.len() == before {
            return Err(Self::not_found("Connection", connection_id));
        }
        Ok(())
    }

    async fn route_message(&self, request: &MessageRouteRequest) -> Result<RouteResponse, ApiError> {
        self.enter("route_message").await?;
        Ok(json!({"from": request.from_agent, "to": request.to_agent, "status": "delivered"}))
    }

    async fn broadcast_message(&self, request: &MessageBroadcastRequest) -> Result<BroadcastResult, ApiError> {
        self.enter("broadcast_message").await?;
        let results = self
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.from_agent == request.from_agent)
            .map(|c| json!({"from": request.from_agent, "to": c.to_agent, "status": "delivered"}))
            .collect();
        Ok(BroadcastResult { results })
    }

    async fn message_history(&self, limit: usize) -> Result<MessageLog, ApiError> {
        self.enter("message_history").await?;
        Ok((0..limit.min(3)).map(|i| json!({"seq": i})).collect())
    }

    async fn execute_workflow(&self, request: &WorkflowRequest) -> Result<WorkflowResult, ApiError> {
        self.enter("execute_workflow").await?;
        let steps = request
            .agents
            .iter()
            .zip(1..)
            .map(|(agent_id, step)| WorkflowStep {
                agent_id: agent_id.clone(),
                step,
                query: request.initial_message.clone(),
                response: Some(format!("{agent_id} done")),
                status: "completed".to_owned(),
                error: None,
            })
            .collect::<Vec<_>>();
        Ok(WorkflowResult {
            workflow_id: request.workflow_id.clone(),
            initial_message: request.initial_message.clone(),
            agents: request.agents.clone(),
            final_result: steps.last().and_then(|s| s.response.clone()),
            steps,
            status: "completed".to_owned(),
        })
    }

    async fn health(&self) -> Result<HealthReport, ApiError> {
        self.enter("health").await?;
        Ok(json!({"status": "healthy"}))
    }
}
