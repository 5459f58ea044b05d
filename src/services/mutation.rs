//! Optimistic mutation coordinator.
//!
//! DESIGN
//! ======
//! Every user-initiated change follows the same shape:
//!
//! 1. pre-check the canonical state (creations return an identical existing
//!    record instead of issuing a request),
//! 2. apply the expected effect locally and keep what is needed to undo it,
//! 3. issue the request,
//! 4. on success install the authoritative record, on failure undo and
//!    surface the error in `CanvasState::error`.
//!
//! Each operation carries its own undo data; nothing is serialized across
//! operations, so concurrent edits to one record are last-writer-wins.
//! Placeholders carry a `temp-` id and are superseded by the server id,
//! never merged. Positions are fire-and-forget and never rolled back.
//!
//! A `404` on delete means the server no longer has the record, so the
//! optimistic removal stands.

#[cfg(test)]
#[path = "mutation_test.rs"]
mod mutation_test;

use tracing::{debug, info, warn};

use super::sync::{SyncClient, SyncError};
use crate::error::ErrorCode;
use crate::net::api::ApiError;
use crate::net::types::{
    AgentQueryRequest, AgentRecord, AgentStatus, BroadcastResult, CreateAgentRequest, MessageBroadcastRequest,
    MessageLog, MessageRouteRequest, QueryResponse, RouteResponse, UpdateAgentRequest, WorkflowRequest,
    WorkflowResult,
};
use crate::state::canvas::{
    AgentNode, CanvasState, DEFAULT_SOURCE_HANDLE, DEFAULT_TARGET_HANDLE, Edge, Position, is_placeholder, temp_id,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Start,
    Stop,
}

impl Lifecycle {
    fn pending_status(self) -> AgentStatus {
        match self {
            Self::Start => AgentStatus::Starting,
            Self::Stop => AgentStatus::Stopping,
        }
    }
}

impl SyncClient {
    // =========================================================================
    // EDGES
    // =========================================================================

    /// Create a directed edge. An identical edge (same endpoints and
    /// handles, confirmed or pending) is returned as-is without a request.
    /// A missing handle becomes [`DEFAULT_SOURCE_HANDLE`] or
    /// [`DEFAULT_TARGET_HANDLE`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Api`] when the server rejects the edge; the
    /// placeholder is removed and the message surfaced.
    pub async fn create_edge(
        &self,
        source: &str,
        source_handle: Option<&str>,
        target: &str,
        target_handle: Option<&str>,
    ) -> Result<Edge, SyncError> {
        let placeholder = Edge {
            id: temp_id(),
            source: source.to_owned(),
            source_handle: Some(source_handle.unwrap_or(DEFAULT_SOURCE_HANDLE).to_owned()),
            target: target.to_owned(),
            target_handle: Some(target_handle.unwrap_or(DEFAULT_TARGET_HANDLE).to_owned()),
        };

        let mut existing = None;
        self.update_if(|state| {
            if let Some(found) = state.find_edge(placeholder.key()) {
                existing = Some(found.clone());
                return false;
            }
            state.edges.push(placeholder.clone());
            true
        });
        if let Some(edge) = existing {
            debug!(edge_id = %edge.id, "identical edge exists; create skipped");
            return Ok(edge);
        }

        let request = Edge { id: uuid::Uuid::new_v4().to_string(), ..placeholder.clone() }.to_record();
        match self.api().create_connection(&request).await {
            Ok(created) => {
                let confirmed = Edge { id: created.connection_id, ..placeholder.clone() };
                self.update(|state| confirm_edge(state, &placeholder.id, &confirmed));
                info!(edge_id = %confirmed.id, source, target, "edge created");
                Ok(confirmed)
            }
            Err(e) => Err(self.roll_back("create_edge", e.into(), |state| {
                state.edges.retain(|edge| edge.id != placeholder.id);
            })),
        }
    }

    /// Delete an edge. The removal is optimistic; a failed request puts the
    /// edge back where it was.
    ///
    /// # Errors
    ///
    /// [`SyncError::PendingConfirmation`] for an unconfirmed edge,
    /// [`SyncError::UnknownEdge`] when absent, [`SyncError::Api`] on failure.
    pub async fn delete_edge(&self, edge_id: &str) -> Result<(), SyncError> {
        if is_placeholder(edge_id) {
            return Err(SyncError::PendingConfirmation(edge_id.to_owned()));
        }

        let mut removed = None;
        self.update_if(|state| {
            removed = state.remove_edge(edge_id);
            removed.is_some()
        });
        let Some((index, edge)) = removed else {
            return Err(SyncError::UnknownEdge(edge_id.to_owned()));
        };

        match self.api().delete_connection(edge_id).await {
            Ok(()) => Ok(()),
            Err(e) if already_gone(&e) => {
                debug!(edge_id, "edge already gone on server");
                Ok(())
            }
            Err(e) => Err(self.roll_back("delete_edge", e.into(), |state| {
                state.restore_edge(index, edge);
            })),
        }
    }

    // =========================================================================
    // AGENTS
    // =========================================================================

    /// Create an agent. A pending placeholder with the same name, model and
    /// prompt is returned instead of submitting twice.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Api`] when creation fails; the placeholder is
    /// removed and the message surfaced.
    pub async fn create_agent(&self, request: CreateAgentRequest) -> Result<AgentNode, SyncError> {
        let temp = temp_id();
        let mut existing = None;
        self.update_if(|state| {
            let duplicate = state.agents.iter().find(|a| {
                a.is_placeholder() && a.label == request.name && a.model == request.model && a.prompt == request.prompt
            });
            if let Some(found) = duplicate {
                existing = Some(found.clone());
                return false;
            }
            let position = self.layout().position_for(&temp);
            state.agents.push(placeholder_agent(&temp, &request, position));
            true
        });
        if let Some(node) = existing {
            debug!(agent_id = %node.id, "identical agent creation in flight; create skipped");
            return Ok(node);
        }

        match self.api().create_agent(&request).await {
            Ok(record) => {
                let position = self.layout().stored_position(&temp).unwrap_or_else(|| self.layout().position_for(&temp));
                self.layout().store_position(&record.id, position);
                self.layout().remove_position(&temp);

                let mut installed = None;
                self.update(|state| installed = Some(confirm_agent(state, &temp, &record, position)));
                info!(agent_id = %record.id, name = %record.config.name, "agent created");
                Ok(installed.unwrap_or_else(|| AgentNode::from_record(&record, position)))
            }
            Err(e) => {
                self.layout().remove_position(&temp);
                Err(self.roll_back("create_agent", e.into(), |state| {
                    state.agents.retain(|a| a.id != temp);
                }))
            }
        }
    }

    /// Update an agent's configuration optimistically.
    ///
    /// # Errors
    ///
    /// [`SyncError::PendingConfirmation`] for a placeholder,
    /// [`SyncError::UnknownAgent`] when absent, [`SyncError::Api`] on failure
    /// (the prior configuration is restored).
    pub async fn update_agent(&self, agent_id: &str, request: UpdateAgentRequest) -> Result<AgentNode, SyncError> {
        if is_placeholder(agent_id) {
            return Err(SyncError::PendingConfirmation(agent_id.to_owned()));
        }

        let mut prior = None;
        self.update_if(|state| {
            let Some(node) = state.agent_mut(agent_id) else {
                return false;
            };
            prior = Some(node.clone());
            if let Some(name) = &request.name {
                node.label.clone_from(name);
            }
            if let Some(model) = &request.model {
                node.model.clone_from(model);
            }
            if request.prompt.is_some() {
                node.prompt.clone_from(&request.prompt);
            }
            true
        });
        let Some(prior) = prior else {
            return Err(SyncError::UnknownAgent(agent_id.to_owned()));
        };

        match self.api().update_agent(agent_id, &request).await {
            Ok(record) => Ok(self.merge_agent(&record)),
            Err(e) => Err(self.roll_back("update_agent", e.into(), |state| {
                if let Some(node) = state.agent_mut(agent_id) {
                    node.label = prior.label;
                    node.model = prior.model;
                    node.prompt = prior.prompt;
                }
            })),
        }
    }

    /// Delete an agent and, optimistically, every edge touching it.
    ///
    /// # Errors
    ///
    /// [`SyncError::PendingConfirmation`] for a placeholder,
    /// [`SyncError::UnknownAgent`] when absent, [`SyncError::Api`] on failure
    /// (the agent and its edges are restored).
    pub async fn delete_agent(&self, agent_id: &str) -> Result<(), SyncError> {
        if is_placeholder(agent_id) {
            return Err(SyncError::PendingConfirmation(agent_id.to_owned()));
        }

        let mut removed = None;
        self.update_if(|state| {
            removed = state.remove_agent(agent_id);
            removed.is_some()
        });
        let Some(removed) = removed else {
            return Err(SyncError::UnknownAgent(agent_id.to_owned()));
        };

        match self.api().delete_agent(agent_id).await {
            Ok(()) => {
                self.layout().remove_position(agent_id);
                info!(agent_id, edges = removed.edges.len(), "agent deleted");
                Ok(())
            }
            Err(e) if already_gone(&e) => {
                self.layout().remove_position(agent_id);
                debug!(agent_id, "agent already gone on server");
                Ok(())
            }
            Err(e) => Err(self.roll_back("delete_agent", e.into(), |state| state.restore_agent(removed))),
        }
    }

    /// # Errors
    ///
    /// See [`SyncClient::stop_agent`].
    pub async fn start_agent(&self, agent_id: &str) -> Result<(), SyncError> {
        self.lifecycle(agent_id, Lifecycle::Start).await
    }

    /// Show the transitional status at once, then refresh from the server.
    ///
    /// # Errors
    ///
    /// [`SyncError::PendingConfirmation`] for a placeholder,
    /// [`SyncError::UnknownAgent`] when absent, [`SyncError::Api`] on failure
    /// (the prior status is restored).
    pub async fn stop_agent(&self, agent_id: &str) -> Result<(), SyncError> {
        self.lifecycle(agent_id, Lifecycle::Stop).await
    }

    async fn lifecycle(&self, agent_id: &str, command: Lifecycle) -> Result<(), SyncError> {
        if is_placeholder(agent_id) {
            return Err(SyncError::PendingConfirmation(agent_id.to_owned()));
        }

        let pending = command.pending_status();
        let mut prior = None;
        self.update_if(|state| {
            let Some(node) = state.agent_mut(agent_id) else {
                return false;
            };
            prior = Some(node.status);
            node.status = pending;
            true
        });
        let Some(prior) = prior else {
            return Err(SyncError::UnknownAgent(agent_id.to_owned()));
        };

        let result = match command {
            Lifecycle::Start => self.api().start_agent(agent_id).await,
            Lifecycle::Stop => self.api().stop_agent(agent_id).await,
        };
        if let Err(e) = result {
            let operation = match command {
                Lifecycle::Start => "start_agent",
                Lifecycle::Stop => "stop_agent",
            };
            return Err(self.roll_back(operation, e.into(), |state| {
                // Only undo our own transitional status; a stream update wins.
                if let Some(node) = state.agent_mut(agent_id).filter(|n| n.status == pending) {
                    node.status = prior;
                }
            }));
        }

        match self.api().get_agent(agent_id).await {
            Ok(record) => {
                self.merge_agent(&record);
            }
            Err(e) => {
                warn!(agent_id, error = %e, code = e.error_code(), "agent refresh failed; awaiting stream update");
            }
        }
        Ok(())
    }

    // =========================================================================
    // LAYOUT AND SELECTION
    // =========================================================================

    /// Move an agent and persist the position. Never rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownAgent`] when the agent is absent.
    pub fn move_agent(&self, agent_id: &str, position: Position) -> Result<(), SyncError> {
        let moved = self.update_if(|state| match state.agent_mut(agent_id) {
            Some(node) => {
                node.position = position;
                true
            }
            None => false,
        });
        if !moved {
            return Err(SyncError::UnknownAgent(agent_id.to_owned()));
        }
        self.layout().store_position(agent_id, position);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`SyncError::UnknownAgent`] when the agent is absent.
    pub fn select_agent(&self, agent_id: &str) -> Result<(), SyncError> {
        let found = self.update_if(|state| {
            if state.agent(agent_id).is_none() {
                return false;
            }
            state.select(Some(agent_id));
            true
        });
        if found { Ok(()) } else { Err(SyncError::UnknownAgent(agent_id.to_owned())) }
    }

    pub fn clear_selection(&self) {
        self.update_if(|state| {
            if state.selected().is_none() {
                return false;
            }
            state.select(None);
            true
        });
    }

    // =========================================================================
    // PASS-THROUGH REQUESTS
    // =========================================================================

    /// # Errors
    ///
    /// Returns [`SyncError::Api`] on failure; the message is also surfaced.
    pub async fn query_agent(&self, agent_id: &str, request: AgentQueryRequest) -> Result<QueryResponse, SyncError> {
        let result = self.api().query_agent(agent_id, &request).await;
        self.surface("query_agent", result)
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Api`] on failure; the message is also surfaced.
    pub async fn execute_workflow(&self, request: WorkflowRequest) -> Result<WorkflowResult, SyncError> {
        let result = self.api().execute_workflow(&request).await;
        self.surface("execute_workflow", result)
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Api`] on failure; the message is also surfaced.
    pub async fn route_message(&self, request: MessageRouteRequest) -> Result<RouteResponse, SyncError> {
        let result = self.api().route_message(&request).await;
        self.surface("route_message", result)
    }

    /// Send `request.message` to every agent `request.from_agent` is
    /// connected to.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Api`] on failure; the message is also surfaced.
    pub async fn broadcast_message(&self, request: MessageBroadcastRequest) -> Result<BroadcastResult, SyncError> {
        let result = self.api().broadcast_message(&request).await;
        self.surface("broadcast_message", result)
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Api`] on failure; the message is also surfaced.
    pub async fn message_history(&self, limit: usize) -> Result<MessageLog, SyncError> {
        let result = self.api().message_history(limit).await;
        self.surface("message_history", result)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn merge_agent(&self, record: &AgentRecord) -> AgentNode {
        let mut merged = None;
        self.update(|state| match state.agent_mut(&record.id) {
            Some(node) => {
                node.merge_record(record);
                merged = Some(node.clone());
            }
            None => {
                let node = AgentNode::from_record(record, self.layout().position_for(&record.id));
                merged = Some(node.clone());
                state.agents.push(node);
            }
        });
        merged.unwrap_or_else(|| AgentNode::from_record(record, Position::default()))
    }

    /// Undo an optimistic change, surface the error and hand it back.
    fn roll_back(&self, operation: &str, error: SyncError, undo: impl FnOnce(&mut CanvasState)) -> SyncError {
        warn!(operation, error = %error, code = error.error_code(), "request failed; rolling back");
        let message = error.to_string();
        self.update(|state| {
            undo(state);
            state.error = Some(message);
        });
        error
    }

    fn surface<T>(&self, operation: &str, result: Result<T, ApiError>) -> Result<T, SyncError> {
        result.map_err(|e| {
            let error = SyncError::from(e);
            warn!(operation, error = %error, code = error.error_code(), "request failed");
            self.fail(&error);
            error
        })
    }
}

fn already_gone(error: &ApiError) -> bool {
    matches!(error, ApiError::ApiResponse { status: 404, .. })
}

fn placeholder_agent(temp: &str, request: &CreateAgentRequest, position: Position) -> AgentNode {
    AgentNode {
        id: temp.to_owned(),
        label: request.name.clone(),
        kind: request.kind.clone(),
        model: request.model.clone(),
        prompt: request.prompt.clone(),
        status: AgentStatus::Starting,
        address: None,
        error: None,
        port: None,
        last_health_check: None,
        position,
        selected: false,
    }
}

/// Replace a pending edge with its confirmed form. The stream may already
/// have delivered it, or a snapshot may have dropped the placeholder.
fn confirm_edge(state: &mut CanvasState, placeholder_id: &str, confirmed: &Edge) {
    if state.edge(&confirmed.id).is_some() {
        state.edges.retain(|e| e.id != placeholder_id);
        return;
    }
    if let Some(slot) = state.edges.iter_mut().find(|e| e.id == placeholder_id) {
        *slot = confirmed.clone();
        return;
    }
    if state.find_edge(confirmed.key()).is_none() {
        state.edges.push(confirmed.clone());
    }
}

/// Swap the placeholder agent for the server record, carrying the
/// placeholder's position and selection over.
fn confirm_agent(state: &mut CanvasState, temp: &str, record: &AgentRecord, position: Position) -> AgentNode {
    let placeholder = state.agents.iter().position(|a| a.id == temp);
    let selected = placeholder.is_some_and(|i| state.agents[i].selected);

    if let Some(node) = state.agent_mut(&record.id) {
        node.merge_record(record);
        node.position = position;
        node.selected |= selected;
        let node = node.clone();
        state.agents.retain(|a| a.id != temp);
        return node;
    }

    let mut node = AgentNode::from_record(record, position);
    node.selected = selected;
    match placeholder {
        Some(index) => state.agents[index] = node.clone(),
        None => state.agents.push(node.clone()),
    }
    node
}
