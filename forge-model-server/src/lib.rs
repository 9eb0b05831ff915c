//! Forge Model Server
//!
//! Holds deployed model versions in memory and serves predictions.
//! The orchestrator activates new versions through the internal load endpoint;
//! operators list, roll back and unload models through the public API.

pub mod api;
pub mod config;
pub mod predictor;
pub mod registry;
