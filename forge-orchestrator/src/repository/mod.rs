//! Repository Module
//!
//! Data access layer for the orchestrator.

pub mod pipeline;

pub use pipeline as pipeline_repository;
