//! Client services.
//!
//! ARCHITECTURE
//! ============
//! `sync` owns the canonical state, REST loading and the stream
//! subscription. `mutation` layers the optimistic operations on top of the
//! same `SyncClient` handle.

pub mod mutation;
pub mod sync;

#[cfg(test)]
#[path = "sync_helpers_test.rs"]
pub(crate) mod test_helpers;
