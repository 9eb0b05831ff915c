//! Data Transfer Objects
//!
//! Request and response bodies for the orchestrator and model server HTTP APIs.

pub mod log;
pub mod model;
pub mod pipeline;
