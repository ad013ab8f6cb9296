//! Details stored on resumption triggers.

use rootcause::Report;
use serde::{Deserialize, Serialize};
use tidewater_core::ExecutionId;
use tidewater_scheduler::FunctionError;
use tidewater_workflow::Trigger;

/// The step a resumption trigger completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeDetails {
    pub step_id: String,
}

impl ResumeDetails {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "step_id": self.step_id })
    }

    /// Reads the execution and step a trigger resumes.
    pub fn from_trigger(trigger: &Trigger) -> Result<(ExecutionId, Self), Report<FunctionError>> {
        let Some(execution_id) = trigger.execution_id() else {
            return Err(FunctionError::InvalidDetails {
                trigger_id: trigger.id,
                reason: "trigger does not target an execution".to_string(),
            }
            .into());
        };
        let details: Self = serde_json::from_value(trigger.details.clone()).map_err(|e| {
            FunctionError::InvalidDetails {
                trigger_id: trigger.id,
                reason: e.to_string(),
            }
        })?;
        Ok((execution_id, details))
    }
}
