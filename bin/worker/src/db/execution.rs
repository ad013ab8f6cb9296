//! Execution rows and the step-cursor commit.

use super::{invalid_column, store_error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tidewater_core::{ExecutionId, WorkflowId};
use tidewater_workflow::{
    ExecutionState, ExecutionStore, Step, StoreError, WorkflowExecution,
};

/// Row type for execution queries.
#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    steps: serde_json::Value,
    step_index: i32,
    state: serde_json::Value,
    started_at: DateTime<Utc>,
}

impl ExecutionRow {
    fn try_into_record(self) -> Result<WorkflowExecution, sqlx::Error> {
        let id = ExecutionId::from_str(&self.id)
            .map_err(|e| invalid_column("execution id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| invalid_column("workflow id", &self.workflow_id, e))?;
        let steps: Vec<Step> = serde_json::from_value(self.steps)
            .map_err(|e| invalid_column("step snapshot of execution", &self.id, e))?;
        let state: ExecutionState = serde_json::from_value(self.state)
            .map_err(|e| invalid_column("state of execution", &self.id, e))?;
        let step_index = usize::try_from(self.step_index)
            .map_err(|e| invalid_column("step index of execution", &self.id, e))?;

        Ok(WorkflowExecution {
            id,
            workflow_id,
            steps,
            step_index,
            state,
            started_at: self.started_at,
        })
    }
}

fn index_column(index: usize) -> Result<i32, sqlx::Error> {
    i32::try_from(index).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn json_column<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Executions in Postgres.
#[derive(Debug, Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn create(&self, execution: &WorkflowExecution) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions (id, workflow_id, steps, step_index, state, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(json_column(&execution.steps)?)
        .bind(index_column(execution.step_index)?)
        .bind(json_column(&execution.state)?)
        .bind(execution.started_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>, sqlx::Error> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, steps, step_index, state, started_at
            FROM workflow_executions
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExecutionRow::try_into_record).transpose()
    }

    async fn delete_by_id(&self, id: ExecutionId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workflow_executions WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Moves the cursor only if it is still at `expected_index`. The single
    /// conditional UPDATE is the compare-and-swap.
    async fn commit(
        &self,
        id: ExecutionId,
        expected_index: usize,
        state: &ExecutionState,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET step_index = step_index + 1, state = $3
            WHERE id = $1 AND step_index = $2
            "#,
        )
        .bind(id.to_string())
        .bind(index_column(expected_index)?)
        .bind(json_column(state)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<WorkflowExecution>, sqlx::Error> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, steps, step_index, state, started_at
            FROM workflow_executions
            WHERE workflow_id = $1
            ORDER BY started_at ASC
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into_record()).collect()
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn insert(&self, execution: &WorkflowExecution) -> Result<(), Report<StoreError>> {
        Ok(self.create(execution).await.map_err(store_error("execution"))?)
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>, Report<StoreError>> {
        Ok(self.find_by_id(id).await.map_err(store_error("execution"))?)
    }

    async fn delete(&self, id: ExecutionId) -> Result<bool, Report<StoreError>> {
        Ok(self.delete_by_id(id).await.map_err(store_error("execution"))?)
    }

    async fn commit_step(
        &self,
        id: ExecutionId,
        expected_index: usize,
        state: &ExecutionState,
    ) -> Result<bool, Report<StoreError>> {
        Ok(self
            .commit(id, expected_index, state)
            .await
            .map_err(store_error("execution"))?)
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<WorkflowExecution>, Report<StoreError>> {
        Ok(self
            .list_by_workflow(workflow_id)
            .await
            .map_err(store_error("execution"))?)
    }
}
