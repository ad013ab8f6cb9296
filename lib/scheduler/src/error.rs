//! Error types for the scheduler crate.
//!
//! - `FunctionError`: a trigger function failed
//! - `RegistryError`: function registration and start-up verification
//! - `DispatchError`: an event or tick could not be dispatched
//! - `ScheduleError`: cron expressions that cannot be evaluated

use std::fmt;
use tidewater_core::TriggerId;

/// Errors raised by trigger functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionError {
    /// The event does not carry what the function needs.
    InvalidEvent { reason: String },
    /// The trigger's details blob is missing fields.
    InvalidDetails { trigger_id: TriggerId, reason: String },
    /// The engine rejected the start or resumption.
    Engine { reason: String },
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEvent { reason } => write!(f, "unexpected event: {reason}"),
            Self::InvalidDetails { trigger_id, reason } => {
                write!(f, "trigger {trigger_id} has invalid details: {reason}")
            }
            Self::Engine { reason } => write!(f, "engine call failed: {reason}"),
        }
    }
}

impl std::error::Error for FunctionError {}

/// Errors from the trigger function registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A function name was registered twice.
    DuplicateFunction { name: String },
    /// A stored trigger names a function that is not registered.
    UnresolvedFunction { trigger_id: TriggerId, name: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateFunction { name } => {
                write!(f, "trigger function '{name}' is already registered")
            }
            Self::UnresolvedFunction { trigger_id, name } => {
                write!(f, "trigger {trigger_id} names unregistered function '{name}'")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors from dispatching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Looking up or deleting triggers failed.
    Store { operation: &'static str, reason: String },
    /// A trigger names a function missing from the registry.
    UnknownFunction { trigger_id: TriggerId, name: String },
    /// The bound function failed.
    Function { trigger_id: TriggerId, reason: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store { operation, reason } => {
                write!(f, "trigger store call failed during {operation}: {reason}")
            }
            Self::UnknownFunction { trigger_id, name } => {
                write!(f, "trigger {trigger_id} names unregistered function '{name}'")
            }
            Self::Function { trigger_id, reason } => {
                write!(f, "function for trigger {trigger_id} failed: {reason}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Errors from schedule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The expression does not parse.
    InvalidCronExpression { expression: String, reason: String },
    /// Loading due triggers failed.
    Store { reason: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::Store { reason } => write!(f, "loading due triggers failed: {reason}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "every day".to_string(),
            reason: "bad field".to_string(),
        };
        assert!(err.to_string().contains("every day"));
    }

    #[test]
    fn registry_error_names_function() {
        let err = RegistryError::UnresolvedFunction {
            trigger_id: TriggerId::new(),
            name: "steps.gone".to_string(),
        };
        assert!(err.to_string().contains("'steps.gone'"));
    }
}
