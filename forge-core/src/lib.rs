//! Forge Core
//!
//! Core types shared by the Forge services.
//!
//! This crate contains:
//! - Domain types: pipeline runs, phases, live log events, model descriptions
//! - DTOs: request/response bodies exchanged between orchestrator, model server and CLI

pub mod domain;
pub mod dto;
