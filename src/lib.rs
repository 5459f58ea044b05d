//! agentboard: client-side state synchronization for an agent
//! orchestration server.
//!
//! ARCHITECTURE
//! ============
//! The server of record is reached two ways: a request/response API for
//! mutations (`net::api`) and one shared push stream for authoritative
//! events (`net::stream`). `state::reducer` folds stream events into the
//! canonical `state::canvas::CanvasState`, keeping UI-only attributes such
//! as positions (`state::layout`) and selection. `services::sync` owns that
//! state; `services::mutation` layers optimistic edits with rollback on top.

pub mod config;
pub mod error;
pub mod net;
pub mod services;
pub mod state;
