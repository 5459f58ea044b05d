//! Canonical client-side state: agents, edges and connection flags.
//!
//! DESIGN
//! ======
//! `CanvasState` is a plain value. The sync client publishes it behind an
//! `Arc` and edits go through `Arc::make_mut`, so a reader holding an older
//! snapshot never observes a half-applied transition.
//!
//! Each `AgentNode` mixes server-authoritative fields with two UI-owned
//! fields, `position` and `selected`, which only local actions may change.

#[cfg(test)]
#[path = "canvas_test.rs"]
mod canvas_test;

use serde::{Deserialize, Serialize};

use crate::net::types::{AgentRecord, AgentStatus, ConnectionRecord};

/// Prefix marking client-issued ids that await server confirmation.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Handles used when a new edge does not name one; the server requires both.
pub const DEFAULT_SOURCE_HANDLE: &str = "right";
pub const DEFAULT_TARGET_HANDLE: &str = "left";

#[must_use]
pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

#[must_use]
pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

// =============================================================================
// POSITION
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// =============================================================================
// AGENT NODE
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AgentNode {
    pub id: String,
    pub label: String,
    pub kind: String,
    pub model: String,
    pub prompt: Option<String>,
    pub status: AgentStatus,
    pub address: Option<String>,
    pub error: Option<String>,
    pub port: Option<u16>,
    pub last_health_check: Option<String>,
    /// UI-owned; never sent by the server.
    pub position: Position,
    /// UI-owned and ephemeral.
    pub selected: bool,
}

impl AgentNode {
    #[must_use]
    pub fn from_record(record: &AgentRecord, position: Position) -> Self {
        let mut node = Self {
            id: record.id.clone(),
            label: String::new(),
            kind: String::new(),
            model: String::new(),
            prompt: None,
            status: AgentStatus::default(),
            address: None,
            error: None,
            port: None,
            last_health_check: None,
            position,
            selected: false,
        };
        node.merge_record(record);
        node
    }

    /// Copy server-authoritative fields from `record`, keeping UI-owned ones.
    pub fn merge_record(&mut self, record: &AgentRecord) {
        self.label.clone_from(&record.config.name);
        self.kind.clone_from(&record.config.kind);
        self.model.clone_from(&record.config.model);
        self.prompt.clone_from(&record.config.prompt);
        self.status = record.status;
        self.address.clone_from(&record.url);
        self.error.clone_from(&record.error_message);
        self.port = record.config.port;
        self.last_health_check.clone_from(&record.last_health_check);
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        is_placeholder(&self.id)
    }
}

// =============================================================================
// EDGE
// =============================================================================

/// Defining tuple of a relation: (source, source handle, target, target handle).
pub type EdgeKey<'a> = (&'a str, Option<&'a str>, &'a str, Option<&'a str>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub source_handle: Option<String>,
    pub target: String,
    pub target_handle: Option<String>,
}

impl Edge {
    #[must_use]
    pub fn from_record(record: &ConnectionRecord) -> Self {
        Self {
            id: record.id.clone(),
            source: record.from_agent.clone(),
            source_handle: record.from_handle.clone(),
            target: record.to_agent.clone(),
            target_handle: record.to_handle.clone(),
        }
    }

    #[must_use]
    pub fn to_record(&self) -> ConnectionRecord {
        ConnectionRecord {
            id: self.id.clone(),
            from_agent: self.source.clone(),
            to_agent: self.target.clone(),
            from_handle: self.source_handle.clone(),
            to_handle: self.target_handle.clone(),
            enabled: true,
        }
    }

    #[must_use]
    pub fn key(&self) -> EdgeKey<'_> {
        (self.source.as_str(), self.source_handle.as_deref(), self.target.as_str(), self.target_handle.as_deref())
    }

    #[must_use]
    pub fn touches(&self, agent_id: &str) -> bool {
        self.source == agent_id || self.target == agent_id
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        is_placeholder(&self.id)
    }
}

// =============================================================================
// CANVAS STATE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanvasState {
    pub agents: Vec<AgentNode>,
    pub edges: Vec<Edge>,
    pub loading: bool,
    pub error: Option<String>,
    pub connected: bool,
}

/// An agent pulled out of the state together with its cascaded edges,
/// retained so the removal can be undone.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedAgent {
    pub index: usize,
    pub node: AgentNode,
    pub edges: Vec<(usize, Edge)>,
}

impl CanvasState {
    #[must_use]
    pub fn agent(&self, id: &str) -> Option<&AgentNode> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn agent_mut(&mut self, id: &str) -> Option<&mut AgentNode> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    #[must_use]
    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    #[must_use]
    pub fn find_edge(&self, key: EdgeKey<'_>) -> Option<&Edge> {
        self.edges.iter().find(|e| e.key() == key)
    }

    #[must_use]
    pub fn selected(&self) -> Option<&AgentNode> {
        self.agents.iter().find(|a| a.selected)
    }

    /// Remove an edge by id, returning it with its former index.
    pub fn remove_edge(&mut self, id: &str) -> Option<(usize, Edge)> {
        let index = self.edges.iter().position(|e| e.id == id)?;
        Some((index, self.edges.remove(index)))
    }

    /// Put a previously removed edge back near its old index, unless an edge
    /// with the same id or tuple has appeared meanwhile.
    pub fn restore_edge(&mut self, index: usize, edge: Edge) -> bool {
        if self.edge(&edge.id).is_some() || self.find_edge(edge.key()).is_some() {
            return false;
        }
        let index = index.min(self.edges.len());
        self.edges.insert(index, edge);
        true
    }

    /// Remove an agent and every edge touching it.
    pub fn remove_agent(&mut self, id: &str) -> Option<RemovedAgent> {
        let index = self.agents.iter().position(|a| a.id == id)?;
        let node = self.agents.remove(index);

        let mut edges = Vec::new();
        let mut kept = Vec::with_capacity(self.edges.len());
        for (i, edge) in std::mem::take(&mut self.edges).into_iter().enumerate() {
            if edge.touches(id) {
                edges.push((i, edge));
            } else {
                kept.push(edge);
            }
        }
        self.edges = kept;
        Some(RemovedAgent { index, node, edges })
    }

    /// Undo [`CanvasState::remove_agent`]. Edges reappear at their original
    /// indices where possible; anything that came back meanwhile is kept.
    pub fn restore_agent(&mut self, removed: RemovedAgent) {
        if self.agent(&removed.node.id).is_none() {
            let index = removed.index.min(self.agents.len());
            self.agents.insert(index, removed.node);
        }
        for (index, edge) in removed.edges {
            self.restore_edge(index, edge);
        }
    }

    /// Mark exactly one agent selected, or none.
    pub fn select(&mut self, id: Option<&str>) {
        for agent in &mut self.agents {
            agent.selected = id.is_some_and(|id| agent.id == id);
        }
    }
}
