//! Shared error-code contract.
//!
//! Every boundary (config, layout store, stream decode, request round-trip,
//! coordinator) owns its own `thiserror` enum. They all implement
//! [`ErrorCode`] so logs carry a grepable code and callers can ask whether a
//! retry could help.

/// Grepable error code and retryable flag for surfaced failures.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
