//! Domain modules organized as vertical slices.
//!
//! Each sub-module contains:
//! - `mod.rs`: Update records handed to the app
//! - `wire.rs`: Raw serde structs matching feed payloads
//! - `state.rs`: State containers with update methods (for WS-driven data)

pub mod pair;
