//! In-memory store implementations.
//!
//! Used by tests and by single-process setups without a database.

use crate::definition::Workflow;
use crate::error::StoreError;
use crate::execution::{ExecutionState, WorkflowExecution};
use crate::store::{ExecutionStore, TriggerStore, WorkflowStore};
use crate::trigger::{Correlation, Trigger, TriggerType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use std::collections::HashMap;
use tidewater_core::{ExecutionId, TriggerId, WorkflowId};
use tokio::sync::RwLock;

/// Workflow definitions held in memory.
#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl MemoryWorkflowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a workflow.
    pub async fn insert(&self, workflow: Workflow) {
        self.workflows.write().await.insert(workflow.id, workflow);
    }

    /// Removes a workflow. Returns whether it existed.
    pub async fn remove(&self, id: WorkflowId) -> bool {
        self.workflows.write().await.remove(&id).is_some()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>, Report<StoreError>> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }
}

/// Executions held in memory.
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    executions: RwLock<HashMap<ExecutionId, WorkflowExecution>>,
}

impl MemoryExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored executions.
    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn insert(&self, execution: &WorkflowExecution) -> Result<(), Report<StoreError>> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(StoreError::Backend {
                reason: format!("execution {} already exists", execution.id),
            }
            .into());
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>, Report<StoreError>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: ExecutionId) -> Result<bool, Report<StoreError>> {
        Ok(self.executions.write().await.remove(&id).is_some())
    }

    async fn commit_step(
        &self,
        id: ExecutionId,
        expected_index: usize,
        state: &ExecutionState,
    ) -> Result<bool, Report<StoreError>> {
        // The write lock makes the compare and the increment atomic.
        let mut executions = self.executions.write().await;
        match executions.get_mut(&id) {
            Some(execution) if execution.step_index == expected_index => {
                execution.step_index = expected_index + 1;
                execution.state = state.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<WorkflowExecution>, Report<StoreError>> {
        let mut found: Vec<_> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.started_at);
        Ok(found)
    }
}

/// Triggers held in memory.
#[derive(Debug, Default)]
pub struct MemoryTriggerStore {
    triggers: RwLock<HashMap<TriggerId, Trigger>>,
}

impl MemoryTriggerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn collect(&self, keep: impl Fn(&Trigger) -> bool) -> Vec<Trigger> {
        let mut found: Vec<_> = self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| keep(t))
            .cloned()
            .collect();
        found.sort_by_key(|t| (t.created_at, t.id));
        found
    }
}

#[async_trait]
impl TriggerStore for MemoryTriggerStore {
    async fn create(&self, trigger: &Trigger) -> Result<(), Report<StoreError>> {
        self.triggers
            .write()
            .await
            .insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn get(&self, id: TriggerId) -> Result<Option<Trigger>, Report<StoreError>> {
        Ok(self.triggers.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: TriggerId) -> Result<bool, Report<StoreError>> {
        Ok(self.triggers.write().await.remove(&id).is_some())
    }

    async fn delete_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<u64, Report<StoreError>> {
        let mut triggers = self.triggers.write().await;
        let before = triggers.len();
        triggers.retain(|_, t| t.workflow_id() != Some(workflow_id));
        Ok((before - triggers.len()) as u64)
    }

    async fn delete_for_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<u64, Report<StoreError>> {
        let mut triggers = self.triggers.write().await;
        let before = triggers.len();
        triggers.retain(|_, t| t.execution_id() != Some(execution_id));
        Ok((before - triggers.len()) as u64)
    }

    async fn find(
        &self,
        trigger_type: TriggerType,
        key: &str,
    ) -> Result<Vec<Trigger>, Report<StoreError>> {
        Ok(self
            .collect(|t| t.trigger_type() == trigger_type && t.correlation.key() == key)
            .await)
    }

    async fn due_time_triggers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Trigger>, Report<StoreError>> {
        let mut due = self
            .collect(|t| matches!(t.correlation, Correlation::Time { fire_at } if fire_at <= now))
            .await;
        due.sort_by_key(|t| match t.correlation {
            Correlation::Time { fire_at } => fire_at,
            _ => now,
        });
        Ok(due)
    }

    async fn list_by_type(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, Report<StoreError>> {
        Ok(self.collect(|t| t.trigger_type() == trigger_type).await)
    }

    async fn list_all(&self) -> Result<Vec<Trigger>, Report<StoreError>> {
        Ok(self.collect(|_| true).await)
    }
}
