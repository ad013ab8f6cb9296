//! Workflow definition rows.

use super::{invalid_column, store_error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tidewater_core::WorkflowId;
use tidewater_workflow::{Step, StoreError, Workflow, WorkflowStore};

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    description: String,
    creator_user_id: String,
    access_token: Option<String>,
    steps: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_record(self) -> Result<Workflow, sqlx::Error> {
        let id = WorkflowId::from_str(&self.id)
            .map_err(|e| invalid_column("workflow id", &self.id, e))?;
        let steps: Vec<Step> = serde_json::from_value(self.steps)
            .map_err(|e| invalid_column("step list of workflow", &self.id, e))?;

        Ok(Workflow {
            id,
            name: self.name,
            description: self.description,
            creator_user_id: self.creator_user_id,
            access_token: self.access_token,
            steps,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Workflow definitions in Postgres.
#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds a workflow by ID.
    pub async fn find_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, sqlx::Error> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, creator_user_id, access_token, steps,
                   created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_into_record()?)),
            None => Ok(None),
        }
    }

    /// Creates or replaces a workflow.
    pub async fn upsert(&self, workflow: &Workflow) -> Result<(), sqlx::Error> {
        let steps = serde_json::to_value(&workflow.steps)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, name, description, creator_user_id, access_token, steps,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET name = $2, description = $3, access_token = $5, steps = $6,
                updated_at = $8
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&workflow.creator_user_id)
        .bind(&workflow.access_token)
        .bind(steps)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>, Report<StoreError>> {
        Ok(self.find_by_id(id).await.map_err(store_error("workflow"))?)
    }
}
