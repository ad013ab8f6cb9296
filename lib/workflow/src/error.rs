//! Error types for the workflow crate.
//!
//! Errors are carried in rootcause reports. A lower layer's report is mapped
//! into the calling layer's enum with its message kept as the reason:
//! - `StoreError`: persistence failures from any store implementation
//! - `StepError`: failures raised by step handlers
//! - `TriggerError`: rejected trigger definitions
//! - `EngineError`: failures of a single `proceed`/`advance` call
//! - `ValidationError`: save-time problems found in a workflow definition

use std::fmt;
use tidewater_core::{ExecutionId, WorkflowId};

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store rejected or failed the operation.
    Backend { reason: String },
    /// A persisted row could not be decoded.
    Corrupt { entity: &'static str, reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { reason } => write!(f, "store operation failed: {reason}"),
            Self::Corrupt { entity, reason } => {
                write!(f, "stored {entity} is malformed: {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors raised by step handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// An input value could not be interpreted.
    InvalidInput { input: String, reason: String },
    /// A downstream service call failed.
    External { service: String, message: String },
    /// The step cannot run in the current context.
    Unavailable { reason: String },
    /// Registering the resumption trigger failed.
    Suspension { reason: String },
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { input, reason } => {
                write!(f, "invalid input '{input}': {reason}")
            }
            Self::External { service, message } => {
                write!(f, "external service error ({service}): {message}")
            }
            Self::Unavailable { reason } => write!(f, "step unavailable: {reason}"),
            Self::Suspension { reason } => write!(f, "failed to suspend step: {reason}"),
        }
    }
}

impl std::error::Error for StepError {}

/// Errors for trigger definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    /// Recurring triggers must target a workflow and one-shot triggers an execution.
    TargetMismatch { trigger_type: String },
    /// A correlation field cannot be encoded.
    InvalidCorrelation { reason: String },
    /// The bound function name is not registered.
    UnknownFunction { name: String },
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetMismatch { trigger_type } => {
                write!(f, "{trigger_type} trigger bound to the wrong kind of target")
            }
            Self::InvalidCorrelation { reason } => {
                write!(f, "invalid trigger correlation: {reason}")
            }
            Self::UnknownFunction { name } => {
                write!(f, "trigger function '{name}' is not registered")
            }
        }
    }
}

impl std::error::Error for TriggerError {}

/// Errors from the step registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A step type id was registered twice.
    DuplicateStep { type_id: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateStep { type_id } => {
                write!(f, "step type '{type_id}' is already registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors from a single engine operation.
///
/// Any of these leaves the execution at its current step index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow has no access token and cannot run.
    NotInstalled { workflow_id: WorkflowId },
    /// The current step's type id is not in the registry.
    UnknownStepType { execution_id: ExecutionId, type_id: String },
    /// A step input could not be substituted.
    MalformedInput {
        execution_id: ExecutionId,
        step_id: String,
        input: String,
    },
    /// The persisted execution could not be read.
    MalformedState { execution_id: ExecutionId },
    /// The step handler failed.
    StepFailed {
        execution_id: ExecutionId,
        step_id: String,
        reason: String,
    },
    /// A store call failed.
    Store {
        operation: &'static str,
        reason: String,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled { workflow_id } => {
                write!(f, "workflow {workflow_id} is not installed")
            }
            Self::UnknownStepType {
                execution_id,
                type_id,
            } => {
                write!(f, "step type '{type_id}' not found (execution {execution_id})")
            }
            Self::MalformedInput {
                execution_id,
                step_id,
                input,
            } => {
                write!(
                    f,
                    "input '{input}' of step {step_id} is malformed (execution {execution_id})"
                )
            }
            Self::MalformedState { execution_id } => {
                write!(f, "execution {execution_id} has malformed state")
            }
            Self::StepFailed {
                execution_id,
                step_id,
                reason,
            } => {
                write!(f, "step {step_id} failed (execution {execution_id}): {reason}")
            }
            Self::Store { operation, reason } => {
                write!(f, "store call failed during {operation}: {reason}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// A problem found when validating a workflow before it is saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Two steps share an id.
    DuplicateStepId { step_id: String },
    /// The step type is not registered.
    UnknownStepType { step_id: String, type_id: String },
    /// A required input is empty.
    MissingRequiredInput { step_id: String, input: String },
    /// A rich text input is not valid rich text JSON.
    MalformedRichText { step_id: String, input: String },
    /// A token references an output that is not produced before this step.
    UnknownReference {
        step_id: String,
        input: String,
        token: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateStepId { step_id } => write!(f, "duplicate step id '{step_id}'"),
            Self::UnknownStepType { step_id, type_id } => {
                write!(f, "step {step_id} uses unknown type '{type_id}'")
            }
            Self::MissingRequiredInput { step_id, input } => {
                write!(f, "step {step_id} is missing required input '{input}'")
            }
            Self::MalformedRichText { step_id, input } => {
                write!(f, "step {step_id} input '{input}' is not valid rich text")
            }
            Self::UnknownReference {
                step_id,
                input,
                token,
            } => {
                write!(
                    f,
                    "step {step_id} input '{input}' references unavailable value {token}"
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}
