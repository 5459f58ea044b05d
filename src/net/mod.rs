//! Network boundary: wire records, push-stream events, the request/response
//! client and the push-stream connection manager.

pub mod api;
pub mod event;
pub mod stream;
pub mod types;
