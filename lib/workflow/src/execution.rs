//! Execution state for workflow runs.
//!
//! A `WorkflowExecution` is one running instance of a workflow. It works from
//! a snapshot of the workflow's steps taken at start, so later edits to the
//! workflow never shift an in-flight run. The cursor only moves through the
//! engine's compare-and-swap commit.

use crate::definition::{Step, Workflow};
use crate::template::trigger_output_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tidewater_core::{ExecutionId, WorkflowId};

/// The mutable state blob of an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// The user the run acts on behalf of.
    pub trigger_user_id: String,
    /// Accumulated outputs keyed `stepId.outputKey`.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Extra context values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ExecutionState {
    /// Creates empty state for a triggering user.
    #[must_use]
    pub fn new(trigger_user_id: impl Into<String>) -> Self {
        Self {
            trigger_user_id: trigger_user_id.into(),
            outputs: BTreeMap::new(),
            context: BTreeMap::new(),
        }
    }

    /// Seeds initial values under the `trigger` namespace.
    pub fn seed_trigger_outputs(&mut self, initial: &BTreeMap<String, String>) {
        for (key, value) in initial {
            self.outputs.insert(trigger_output_key(key), value.clone());
        }
    }

    /// Merges a step's outputs under `stepId.outputKey`.
    pub fn record_outputs(&mut self, step_id: &str, outputs: &BTreeMap<String, String>) {
        for (key, value) in outputs {
            self.outputs.insert(format!("{step_id}.{key}"), value.clone());
        }
    }
}

/// Coarse status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Steps remain.
    Running,
    /// The cursor reached the end; the row is about to be deleted.
    Completed,
}

/// Progress of one step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Current,
    Pending,
}

/// A step's id, type and progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub step_id: String,
    pub type_id: String,
    pub status: StepStatus,
}

/// A persisted workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique identifier.
    pub id: ExecutionId,
    /// The workflow this run belongs to.
    pub workflow_id: WorkflowId,
    /// The workflow's steps as they were when the run started.
    pub steps: Vec<Step>,
    /// Index of the current step; equals `steps.len()` once finished.
    pub step_index: usize,
    /// Trigger user and accumulated outputs.
    pub state: ExecutionState,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl WorkflowExecution {
    /// Creates an execution at step 0 from a snapshot of the workflow.
    #[must_use]
    pub fn new(workflow: &Workflow, trigger_user_id: impl Into<String>) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id: workflow.id,
            steps: workflow.steps.clone(),
            step_index: 0,
            state: ExecutionState::new(trigger_user_id),
            started_at: Utc::now(),
        }
    }

    /// The step at the cursor, if any remain.
    #[must_use]
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.step_index)
    }

    /// Whether every step has run.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.step_index >= self.steps.len()
    }

    /// Returns the coarse status.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        if self.is_finished() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Running
        }
    }

    /// Per-step progress in snapshot order.
    #[must_use]
    pub fn step_progress(&self) -> Vec<StepProgress> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepProgress {
                step_id: step.id.clone(),
                type_id: step.type_id.clone(),
                status: match index.cmp(&self.step_index) {
                    std::cmp::Ordering::Less => StepStatus::Completed,
                    std::cmp::Ordering::Equal => StepStatus::Current,
                    std::cmp::Ordering::Greater => StepStatus::Pending,
                },
            })
            .collect()
    }
}
