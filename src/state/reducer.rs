//! Event reducer: `(state, event) -> state`.
//!
//! DESIGN
//! ======
//! `apply` is total. Each event is processed by a fallible inner step; when
//! that step reports a fault the input state is returned untouched and the
//! fault is logged. Unknown event kinds are a no-op.
//!
//! Server events only ever write server-authoritative fields. Position and
//! selection come from the prior state, or from the position source for
//! agents seen for the first time.
//!
//! Relation uniqueness is enforced at mutation time; the reducer only
//! de-duplicates by tuple as a second line of defense, and lets an
//! authoritative relation supersede a placeholder with the same tuple.

#[cfg(test)]
#[path = "reducer_test.rs"]
mod reducer_test;

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use super::canvas::{AgentNode, CanvasState, Edge, Position};
use super::layout::PositionCache;
use crate::error::ErrorCode;
use crate::net::event::SyncEvent;
use crate::net::types::{AgentRecord, ConnectionRecord};

const DEFAULT_CONNECTION_ERROR: &str = "connection lost";
const DEFAULT_CONNECTION_FAILED: &str = "unable to reconnect to server";

/// Supplies layout coordinates for agents the state has not seen yet.
pub trait PositionSource {
    fn position_for(&self, entity_id: &str) -> Position;
}

impl PositionSource for PositionCache {
    fn position_for(&self, entity_id: &str) -> Position {
        PositionCache::position_for(self, entity_id)
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    #[error("{kind} event carries an empty id")]
    EmptyId { kind: &'static str },

    #[error("duplicate agent id {0} in snapshot")]
    DuplicateAgent(String),
}

impl ErrorCode for ReduceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyId { .. } => "E_PROTOCOL_EMPTY_ID",
            Self::DuplicateAgent(_) => "E_PROTOCOL_DUPLICATE",
        }
    }
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Apply one event. Never fails: a faulty event leaves `state` unchanged.
#[must_use]
pub fn apply(state: &CanvasState, event: &SyncEvent, positions: &dyn PositionSource) -> CanvasState {
    match try_apply(state, event, positions) {
        Ok(next) => next,
        Err(e) => {
            warn!(kind = event.kind(), error = %e, code = e.error_code(), "event rejected; state unchanged");
            state.clone()
        }
    }
}

/// Decode and apply one raw stream message.
#[must_use]
pub fn apply_json(state: &CanvasState, raw: &str, positions: &dyn PositionSource) -> CanvasState {
    match SyncEvent::decode(raw) {
        Ok(event) => apply(state, &event, positions),
        Err(e) => {
            warn!(error = %e, code = e.error_code(), "malformed event; state unchanged");
            state.clone()
        }
    }
}

/// Replace agents and edges with a full snapshot, carrying UI-owned fields
/// over from `state` for agents that survive.
///
/// # Errors
///
/// Returns [`ReduceError`] when the snapshot carries empty or duplicate ids.
pub fn replace_snapshot(
    state: &CanvasState,
    agents: &[AgentRecord],
    connections: &[ConnectionRecord],
    positions: &dyn PositionSource,
) -> Result<CanvasState, ReduceError> {
    // Validate the whole snapshot before any position is allocated, so a
    // rejected snapshot leaves the durable cache untouched.
    let mut seen: HashSet<&str> = HashSet::with_capacity(agents.len());
    for record in agents {
        check_id(&record.id, "initial_state")?;
        if !seen.insert(record.id.as_str()) {
            return Err(ReduceError::DuplicateAgent(record.id.clone()));
        }
    }
    for record in connections {
        check_id(&record.id, "initial_state")?;
    }

    let prior: HashMap<&str, &AgentNode> = state.agents.iter().map(|a| (a.id.as_str(), a)).collect();

    let mut next_agents: Vec<AgentNode> = Vec::with_capacity(agents.len());
    for record in agents {
        let node = match prior.get(record.id.as_str()) {
            Some(existing) => {
                let mut node = (*existing).clone();
                node.merge_record(record);
                node
            }
            None => AgentNode::from_record(record, positions.position_for(&record.id)),
        };
        next_agents.push(node);
    }

    let mut next_edges: Vec<Edge> = Vec::with_capacity(connections.len());
    for record in connections {
        let edge = Edge::from_record(record);
        if next_edges.iter().any(|e| e.id == edge.id || e.key() == edge.key()) {
            debug!(connection_id = %edge.id, "duplicate relation in snapshot dropped");
            continue;
        }
        next_edges.push(edge);
    }

    Ok(CanvasState { agents: next_agents, edges: next_edges, ..state.clone() })
}

// =============================================================================
// DISPATCH
// =============================================================================

fn try_apply(
    state: &CanvasState,
    event: &SyncEvent,
    positions: &dyn PositionSource,
) -> Result<CanvasState, ReduceError> {
    match event {
        SyncEvent::InitialState { agents, connections } => {
            let mut next = replace_snapshot(state, agents, connections, positions)?;
            next.connected = true;
            next.loading = false;
            Ok(next)
        }
        SyncEvent::AgentUpdated { agent } => agent_updated(state, agent, positions),
        SyncEvent::AgentDeleted { agent_id, connections_removed } => {
            agent_deleted(state, agent_id, connections_removed)
        }
        SyncEvent::ConnectionAdded { connection } => connection_added(state, connection),
        SyncEvent::ConnectionRemoved { connection_id } => {
            check_id(connection_id, "connection_removed")?;
            let mut next = state.clone();
            next.edges.retain(|e| e.id != *connection_id);
            Ok(next)
        }
        SyncEvent::ConnectionEstablished => {
            Ok(CanvasState { connected: true, error: None, ..state.clone() })
        }
        SyncEvent::ConnectionError { error } => Ok(disconnected(state, error.as_deref(), DEFAULT_CONNECTION_ERROR)),
        SyncEvent::ConnectionFailed { error } => Ok(disconnected(state, error.as_deref(), DEFAULT_CONNECTION_FAILED)),
        SyncEvent::Unknown => {
            debug!("unknown event kind ignored");
            Ok(state.clone())
        }
    }
}

fn agent_updated(
    state: &CanvasState,
    record: &AgentRecord,
    positions: &dyn PositionSource,
) -> Result<CanvasState, ReduceError> {
    check_id(&record.id, "agent_updated")?;
    let mut next = state.clone();
    match next.agent_mut(&record.id) {
        Some(node) => node.merge_record(record),
        // Creations are broadcast as updates.
        None => next.agents.push(AgentNode::from_record(record, positions.position_for(&record.id))),
    }
    Ok(next)
}

fn agent_deleted(state: &CanvasState, agent_id: &str, removed: &[String]) -> Result<CanvasState, ReduceError> {
    check_id(agent_id, "agent_deleted")?;
    let mut next = state.clone();
    next.agents.retain(|a| a.id != agent_id);
    next.edges.retain(|e| !e.touches(agent_id) && !removed.contains(&e.id));
    Ok(next)
}

fn connection_added(state: &CanvasState, record: &ConnectionRecord) -> Result<CanvasState, ReduceError> {
    check_id(&record.id, "connection_added")?;
    let incoming = Edge::from_record(record);
    let mut next = state.clone();

    if let Some(existing) = next.edges.iter_mut().find(|e| e.id == incoming.id) {
        *existing = incoming;
        return Ok(next);
    }

    match next.edges.iter().position(|e| e.key() == incoming.key()) {
        Some(index) if next.edges[index].is_placeholder() => {
            debug!(connection_id = %incoming.id, "authoritative relation supersedes placeholder");
            next.edges[index] = incoming;
        }
        Some(_) => {
            debug!(connection_id = %incoming.id, "duplicate relation ignored");
        }
        None => next.edges.push(incoming),
    }
    Ok(next)
}

fn disconnected(state: &CanvasState, error: Option<&str>, fallback: &str) -> CanvasState {
    let message = error.filter(|e| !e.trim().is_empty()).unwrap_or(fallback);
    CanvasState { connected: false, error: Some(message.to_owned()), ..state.clone() }
}

fn check_id(id: &str, kind: &'static str) -> Result<(), ReduceError> {
    if id.trim().is_empty() {
        return Err(ReduceError::EmptyId { kind });
    }
    Ok(())
}
