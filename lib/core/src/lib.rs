//! Core types shared by every tidewater crate.
//!
//! This crate provides the strongly-typed identifiers for the engine's
//! persisted entities.

pub mod id;

pub use id::{ExecutionId, ParseIdError, TriggerId, WorkflowId};
