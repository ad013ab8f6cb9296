//! Storage traits for workflows, executions and triggers.
//!
//! The engine depends only on these traits. The worker provides Postgres
//! implementations; `crate::memory` provides in-memory ones.

use crate::definition::Workflow;
use crate::error::StoreError;
use crate::execution::{ExecutionState, WorkflowExecution};
use crate::trigger::{Trigger, TriggerType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use tidewater_core::{ExecutionId, TriggerId, WorkflowId};

/// Read access to workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Gets a workflow by id.
    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>, Report<StoreError>>;
}

/// Persistence for executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Inserts a new execution.
    async fn insert(&self, execution: &WorkflowExecution) -> Result<(), Report<StoreError>>;

    /// Gets an execution by id.
    async fn get(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>, Report<StoreError>>;

    /// Deletes an execution. Returns whether a row was removed.
    async fn delete(&self, id: ExecutionId) -> Result<bool, Report<StoreError>>;

    /// Commits a step: stores `state` and moves the cursor from
    /// `expected_index` to `expected_index + 1`, only if the cursor is still
    /// at `expected_index`.
    ///
    /// Returns `false` when the cursor had already moved or the execution is
    /// gone. The compare and the increment must be a single atomic operation.
    async fn commit_step(
        &self,
        id: ExecutionId,
        expected_index: usize,
        state: &ExecutionState,
    ) -> Result<bool, Report<StoreError>>;

    /// Lists the executions of a workflow.
    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<WorkflowExecution>, Report<StoreError>>;
}

/// Persistence and lookup for triggers.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Stores a trigger.
    async fn create(&self, trigger: &Trigger) -> Result<(), Report<StoreError>>;

    /// Gets a trigger by id.
    async fn get(&self, id: TriggerId) -> Result<Option<Trigger>, Report<StoreError>>;

    /// Deletes a trigger. Returns whether a row was removed; deleting a
    /// missing trigger is not an error.
    async fn delete(&self, id: TriggerId) -> Result<bool, Report<StoreError>>;

    /// Deletes every trigger that starts the workflow.
    async fn delete_for_workflow(&self, workflow_id: WorkflowId)
    -> Result<u64, Report<StoreError>>;

    /// Deletes every trigger that resumes the execution.
    async fn delete_for_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<u64, Report<StoreError>>;

    /// Finds every trigger of a type whose correlation key equals `key`.
    async fn find(
        &self,
        trigger_type: TriggerType,
        key: &str,
    ) -> Result<Vec<Trigger>, Report<StoreError>>;

    /// Time triggers whose fire time is at or before `now`, oldest first.
    async fn due_time_triggers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Trigger>, Report<StoreError>>;

    /// Every trigger of a type.
    async fn list_by_type(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, Report<StoreError>>;

    /// Every trigger.
    async fn list_all(&self) -> Result<Vec<Trigger>, Report<StoreError>>;
}
