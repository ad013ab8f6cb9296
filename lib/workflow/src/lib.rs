//! Resumable step-execution engine for tidewater.
//!
//! This crate provides:
//!
//! - **Definitions**: workflows as ordered lists of typed steps
//! - **Step Registry**: step type id to spec and handler
//! - **Templates**: `$!{…}` token substitution, including structural
//!   substitution inside rich text
//! - **Triggers**: correlation-keyed bindings that start or resume runs
//! - **Engine**: the start/proceed/advance state machine over pluggable stores
//! - **Validation**: save-time checks of workflow definitions

pub mod definition;
pub mod engine;
pub mod error;
pub mod execution;
pub mod memory;
pub mod registry;
pub mod rich_text;
pub mod spec;
pub mod store;
pub mod template;
pub mod trigger;
pub mod validate;

pub use definition::{Step, Workflow};
pub use engine::{
    AdvanceOutcome, ChannelRefresher, Engine, NoopRefresher, RunOutcome, StartOptions, Started,
    ViewRefresh, ViewRefresher,
};
pub use error::{
    EngineError, RegistryError, StepError, StoreError, TriggerError, ValidationError,
};
pub use execution::{ExecutionState, ExecutionStatus, StepProgress, StepStatus, WorkflowExecution};
pub use memory::{MemoryExecutionStore, MemoryTriggerStore, MemoryWorkflowStore};
pub use registry::{
    AcceptAllFunctions, FunctionResolver, StepContext, StepHandler, StepInputs, StepOutcome,
    StepOutputs, StepRegistry,
};
pub use rich_text::RichTextBlock;
pub use spec::{DataType, IoSpec, StepSpec};
pub use store::{ExecutionStore, TriggerStore, WorkflowStore};
pub use template::{Replacements, Token};
pub use trigger::{Correlation, Trigger, TriggerLifetime, TriggerTarget, TriggerType};
pub use validate::validate_workflow;
