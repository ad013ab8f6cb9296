//! Postgres implementations of the engine's store traits.
//!
//! - Workflow definitions (read by the engine, written by the editing layer)
//! - In-flight executions with the compare-and-swap step commit
//! - Triggers, indexed by type and correlation key

pub mod execution;
pub mod trigger;
pub mod workflow;

pub use execution::PgExecutionStore;
pub use trigger::PgTriggerStore;
pub use workflow::PgWorkflowStore;

use std::fmt::Display;
use tidewater_workflow::StoreError;

/// A decode failure for a column value.
fn invalid_column(what: &str, value: &str, err: impl Display) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {what} '{value}': {err}"),
    )))
}

/// Maps a sqlx error for `entity` into a store error.
fn store_error(entity: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |err| match err {
        sqlx::Error::Decode(inner) => StoreError::Corrupt {
            entity,
            reason: inner.to_string(),
        },
        other => StoreError::Backend {
            reason: other.to_string(),
        },
    }
}
