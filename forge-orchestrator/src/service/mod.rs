//! Service Module
//!
//! Business logic layer for the orchestrator.

pub mod admission;
pub mod event_bus;
pub mod log;
pub mod orchestrator;

pub use admission as admission_service;
pub use log as log_service;
