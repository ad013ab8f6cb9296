//! Workflow definition types.
//!
//! A workflow is an ordered list of steps owned by the editing layer. The
//! engine only reads definitions; each execution works from a snapshot of the
//! step list taken when it starts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tidewater_core::WorkflowId;
use ulid::Ulid;

/// Length of generated step ids.
const STEP_ID_LEN: usize = 9;

/// Generates a short step id, unique within a workflow.
#[must_use]
pub fn generate_step_id() -> String {
    let encoded = Ulid::new().to_string().to_ascii_lowercase();
    // The trailing characters are the ULID's random component.
    encoded[encoded.len() - STEP_ID_LEN..].to_string()
}

/// A single configured step of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Stable id of this step within its workflow.
    pub id: String,
    /// Key into the step registry.
    pub type_id: String,
    /// Input key to raw value. Structured values are JSON-encoded strings.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

impl Step {
    /// Creates a step of the given type with a generated id and no inputs.
    #[must_use]
    pub fn new(type_id: impl Into<String>) -> Self {
        Self::with_id(generate_step_id(), type_id)
    }

    /// Creates a step with an explicit id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            inputs: BTreeMap::new(),
        }
    }

    /// Sets an input value.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Returns the raw value of an input, or an empty string when unset.
    #[must_use]
    pub fn input(&self, key: &str) -> &str {
        self.inputs.get(key).map_or("", String::as_str)
    }
}

/// A workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Description shown to users.
    #[serde(default)]
    pub description: String,
    /// Chat-platform id of the user who owns the workflow.
    pub creator_user_id: String,
    /// Bot token of the installed workflow app, if installed.
    pub access_token: Option<String>,
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates an empty, not yet installed workflow.
    #[must_use]
    pub fn new(name: impl Into<String>, creator_user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            description: String::new(),
            creator_user_id: creator_user_id.into(),
            access_token: None,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the access token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Appends a step.
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends a step in place.
    pub fn push_step(&mut self, step: Step) {
        self.steps.push(step);
        self.updated_at = Utc::now();
    }

    /// Removes a step by id. Returns whether a step was removed.
    pub fn remove_step(&mut self, step_id: &str) -> bool {
        let before = self.steps.len();
        self.steps.retain(|s| s.id != step_id);
        let removed = self.steps.len() != before;
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Returns the position of a step.
    #[must_use]
    pub fn step_position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Whether the workflow has been installed and can run.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.access_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_step_ids_are_short_and_distinct() {
        let a = generate_step_id();
        let b = generate_step_id();
        assert_eq!(a.len(), STEP_ID_LEN);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn missing_input_reads_as_empty() {
        let step = Step::with_id("s1", "delay").with_input("ms", "1000");
        assert_eq!(step.input("ms"), "1000");
        assert_eq!(step.input("other"), "");
    }

    #[test]
    fn remove_step_by_id() {
        let mut workflow = Workflow::new("Greeter", "U1")
            .with_step(Step::with_id("a", "delay"))
            .with_step(Step::with_id("b", "dm-user"));

        assert!(workflow.remove_step("a"));
        assert!(!workflow.remove_step("a"));
        assert_eq!(workflow.step_position("b"), Some(0));
    }

    #[test]
    fn installed_only_with_token() {
        let workflow = Workflow::new("Greeter", "U1");
        assert!(!workflow.is_installed());
        assert!(workflow.with_access_token("xoxb-1").is_installed());
    }

    #[test]
    fn step_deserializes_without_inputs() {
        let step: Step =
            serde_json::from_str(r#"{"id":"x","type_id":"archive-channel"}"#).expect("parse");
        assert!(step.inputs.is_empty());
    }
}
