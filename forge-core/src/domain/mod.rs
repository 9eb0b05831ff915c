//! Core domain types
//!
//! These types are persisted by the orchestrator, streamed to viewers and
//! returned by the model server. Transition rules for pipeline runs live here
//! so every store implementation enforces the same state machine.

pub mod log;
pub mod model;
pub mod pipeline;
