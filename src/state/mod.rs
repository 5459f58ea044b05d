//! Client-side state: the canonical snapshot, the event reducer and the
//! position allocator.

pub mod canvas;
pub mod layout;
pub mod reducer;
