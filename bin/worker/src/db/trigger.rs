//! Trigger rows.
//!
//! The correlation is stored flat as `(trigger_type, correlation_key)` so
//! lookups are a single indexed equality match. Time triggers also carry
//! `fire_at` for the due-trigger scan.

use super::{invalid_column, store_error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tidewater_core::{ExecutionId, TriggerId, WorkflowId};
use tidewater_workflow::{
    Correlation, StoreError, Trigger, TriggerLifetime, TriggerStore, TriggerTarget, TriggerType,
};

const COLUMNS: &str = "id, trigger_type, correlation_key, workflow_id, execution_id, \
                       function_name, details, lifetime, created_at";

/// Row type for trigger queries.
#[derive(FromRow)]
struct TriggerRow {
    id: String,
    trigger_type: String,
    correlation_key: String,
    workflow_id: Option<String>,
    execution_id: Option<String>,
    function_name: String,
    details: serde_json::Value,
    lifetime: String,
    created_at: DateTime<Utc>,
}

impl TriggerRow {
    fn try_into_record(self) -> Result<Trigger, sqlx::Error> {
        let id =
            TriggerId::from_str(&self.id).map_err(|e| invalid_column("trigger id", &self.id, e))?;
        let trigger_type = TriggerType::parse(&self.trigger_type).ok_or_else(|| {
            invalid_column("trigger type", &self.trigger_type, "unknown type")
        })?;
        let correlation = Correlation::from_key(trigger_type, &self.correlation_key)
            .map_err(|e| invalid_column("correlation key", &self.correlation_key, e))?;
        let lifetime = TriggerLifetime::parse(&self.lifetime)
            .ok_or_else(|| invalid_column("trigger lifetime", &self.lifetime, "unknown lifetime"))?;

        let target = match (self.workflow_id, self.execution_id) {
            (Some(workflow_id), None) => TriggerTarget::Workflow(
                WorkflowId::from_str(&workflow_id)
                    .map_err(|e| invalid_column("workflow id", &workflow_id, e))?,
            ),
            (None, Some(execution_id)) => TriggerTarget::Execution(
                ExecutionId::from_str(&execution_id)
                    .map_err(|e| invalid_column("execution id", &execution_id, e))?,
            ),
            _ => {
                return Err(invalid_column(
                    "target of trigger",
                    &self.id,
                    "exactly one of workflow_id and execution_id must be set",
                ));
            }
        };

        Ok(Trigger {
            id,
            correlation,
            target,
            function: self.function_name,
            details: self.details,
            lifetime,
            created_at: self.created_at,
        })
    }
}

fn into_records(rows: Vec<TriggerRow>) -> Result<Vec<Trigger>, sqlx::Error> {
    rows.into_iter().map(TriggerRow::try_into_record).collect()
}

/// Triggers in Postgres.
#[derive(Debug, Clone)]
pub struct PgTriggerStore {
    pool: PgPool,
}

impl PgTriggerStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, trigger: &Trigger) -> Result<(), sqlx::Error> {
        let fire_at = match trigger.correlation {
            Correlation::Time { fire_at } => Some(fire_at),
            _ => None,
        };
        let (workflow_id, execution_id) = match trigger.target {
            TriggerTarget::Workflow(id) => (Some(id.to_string()), None),
            TriggerTarget::Execution(id) => (None, Some(id.to_string())),
        };

        sqlx::query(
            r#"
            INSERT INTO triggers
                (id, trigger_type, correlation_key, fire_at, workflow_id, execution_id,
                 function_name, details, lifetime, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(trigger.id.to_string())
        .bind(trigger.trigger_type().as_str())
        .bind(trigger.correlation.key())
        .bind(fire_at)
        .bind(workflow_id)
        .bind(execution_id)
        .bind(&trigger.function)
        .bind(&trigger.details)
        .bind(trigger.lifetime.as_str())
        .bind(trigger.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: TriggerId) -> Result<Option<Trigger>, sqlx::Error> {
        let row: Option<TriggerRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM triggers WHERE id = $1"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(TriggerRow::try_into_record).transpose()
    }

    async fn delete_where(&self, column: &str, value: String) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(&format!("DELETE FROM triggers WHERE {column} = $1"))
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn find_by_key(
        &self,
        trigger_type: TriggerType,
        key: &str,
    ) -> Result<Vec<Trigger>, sqlx::Error> {
        let rows: Vec<TriggerRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM triggers \
             WHERE trigger_type = $1 AND correlation_key = $2 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(trigger_type.as_str())
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>, sqlx::Error> {
        let rows: Vec<TriggerRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM triggers \
             WHERE trigger_type = $1 AND fire_at <= $2 \
             ORDER BY fire_at ASC"
        ))
        .bind(TriggerType::Time.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn list(&self, trigger_type: Option<TriggerType>) -> Result<Vec<Trigger>, sqlx::Error> {
        let rows: Vec<TriggerRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM triggers \
             WHERE $1::TEXT IS NULL OR trigger_type = $1 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(trigger_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }
}

#[async_trait]
impl TriggerStore for PgTriggerStore {
    async fn create(&self, trigger: &Trigger) -> Result<(), Report<StoreError>> {
        Ok(self.insert(trigger).await.map_err(store_error("trigger"))?)
    }

    async fn get(&self, id: TriggerId) -> Result<Option<Trigger>, Report<StoreError>> {
        Ok(self.find_by_id(id).await.map_err(store_error("trigger"))?)
    }

    async fn delete(&self, id: TriggerId) -> Result<bool, Report<StoreError>> {
        let removed = self
            .delete_where("id", id.to_string())
            .await
            .map_err(store_error("trigger"))?;
        Ok(removed > 0)
    }

    async fn delete_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<u64, Report<StoreError>> {
        Ok(self
            .delete_where("workflow_id", workflow_id.to_string())
            .await
            .map_err(store_error("trigger"))?)
    }

    async fn delete_for_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<u64, Report<StoreError>> {
        Ok(self
            .delete_where("execution_id", execution_id.to_string())
            .await
            .map_err(store_error("trigger"))?)
    }

    async fn find(
        &self,
        trigger_type: TriggerType,
        key: &str,
    ) -> Result<Vec<Trigger>, Report<StoreError>> {
        Ok(self
            .find_by_key(trigger_type, key)
            .await
            .map_err(store_error("trigger"))?)
    }

    async fn due_time_triggers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Trigger>, Report<StoreError>> {
        Ok(self.list_due(now).await.map_err(store_error("trigger"))?)
    }

    async fn list_by_type(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, Report<StoreError>> {
        Ok(self
            .list(Some(trigger_type))
            .await
            .map_err(store_error("trigger"))?)
    }

    async fn list_all(&self) -> Result<Vec<Trigger>, Report<StoreError>> {
        Ok(self.list(None).await.map_err(store_error("trigger"))?)
    }
}
