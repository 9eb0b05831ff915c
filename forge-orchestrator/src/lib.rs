//! Forge Orchestrator
//!
//! Turns pipeline triggers into tracked, observable notebook runs:
//! - `api`: axum HTTP and WebSocket surface
//! - `service`: admission, the orchestrator worker pool, the event bus
//! - `store`: durable run records (PostgreSQL, or in-process for tests)
//! - `collaborators`: the notebook source, validator, executor, tracker and
//!   model deployer each phase delegates to

pub mod api;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
pub mod store;
