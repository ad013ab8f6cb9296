//! The step registry and the step handler contract.
//!
//! Every step type is registered once at startup with its spec (declared
//! inputs and outputs) and a handler. A handler receives substituted inputs
//! and either completes with outputs or suspends. A suspending handler is
//! responsible for registering the trigger that will resume its step, which
//! it does through [`StepContext::register_resumption`].

use crate::error::{RegistryError, StepError};
use crate::spec::StepSpec;
use crate::store::TriggerStore;
use crate::trigger::{Correlation, Trigger, TriggerTarget};
use async_trait::async_trait;
use rootcause::Report;
use std::collections::BTreeMap;
use std::sync::Arc;
use tidewater_core::{ExecutionId, TriggerId, WorkflowId};
use tracing::debug;

/// Substituted input values by key.
pub type StepInputs = BTreeMap<String, String>;

/// Output values by key.
pub type StepOutputs = BTreeMap<String, String>;

/// The result of running a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step finished; the execution advances with these outputs.
    Completed(StepOutputs),
    /// The step is waiting on an external event.
    Suspended,
}

impl StepOutcome {
    /// Completed with no outputs.
    #[must_use]
    pub fn done() -> Self {
        Self::Completed(StepOutputs::new())
    }
}

/// Answers whether a trigger function name is registered.
pub trait FunctionResolver: Send + Sync {
    /// Whether `name` resolves to a function.
    fn resolves(&self, name: &str) -> bool;
}

/// Resolves every name. For tests and tooling that run without functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFunctions;

impl FunctionResolver for AcceptAllFunctions {
    fn resolves(&self, _name: &str) -> bool {
        true
    }
}

/// What a handler can see and do while its step runs.
pub struct StepContext {
    /// The running execution.
    pub execution_id: ExecutionId,
    /// The workflow the execution belongs to.
    pub workflow_id: WorkflowId,
    /// The step being run.
    pub step_id: String,
    /// The user the run acts on behalf of.
    pub trigger_user_id: String,
    /// Bot token of the installed workflow.
    pub access_token: String,
    interaction: Option<String>,
    triggers: Arc<dyn TriggerStore>,
    resolver: Arc<dyn FunctionResolver>,
}

impl StepContext {
    /// Creates a context.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        step_id: impl Into<String>,
        trigger_user_id: impl Into<String>,
        access_token: impl Into<String>,
        interaction: Option<String>,
        triggers: Arc<dyn TriggerStore>,
        resolver: Arc<dyn FunctionResolver>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            step_id: step_id.into(),
            trigger_user_id: trigger_user_id.into(),
            access_token: access_token.into(),
            interaction,
            triggers,
            resolver,
        }
    }

    /// Takes the interaction id, if one is still available.
    ///
    /// Interaction ids are single-use; later steps see `None`.
    pub fn take_interaction(&mut self) -> Option<String> {
        self.interaction.take()
    }

    /// Whether an interaction id is available.
    #[must_use]
    pub fn has_interaction(&self) -> bool {
        self.interaction.is_some()
    }

    /// The interaction id left unused when the handler returns.
    pub(crate) fn into_interaction(self) -> Option<String> {
        self.interaction
    }

    /// Registers the one-shot trigger that will resume this step.
    ///
    /// `details` is handed back to `function` when the trigger fires.
    ///
    /// # Errors
    ///
    /// Returns `StepError::Suspension` when `function` is not registered,
    /// the correlation is not one-shot, or the trigger cannot be stored.
    pub async fn register_resumption(
        &self,
        correlation: Correlation,
        function: &str,
        details: serde_json::Value,
    ) -> Result<TriggerId, Report<StepError>> {
        if !self.resolver.resolves(function) {
            return Err(StepError::Suspension {
                reason: format!("trigger function '{function}' is not registered"),
            }
            .into());
        }
        let trigger = Trigger::new(
            correlation,
            TriggerTarget::Execution(self.execution_id),
            function,
            details,
        )
        .map_err(|e| StepError::Suspension {
            reason: e.to_string(),
        })?;
        self.triggers
            .create(&trigger)
            .await
            .map_err(|e| StepError::Suspension {
                reason: e.to_string(),
            })?;
        debug!(
            trigger_id = %trigger.id,
            trigger_type = %trigger.trigger_type(),
            function,
            "registered resumption trigger"
        );
        Ok(trigger.id)
    }
}

/// Runs one step type.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Runs the step with substituted inputs.
    async fn run(
        &self,
        ctx: &mut StepContext,
        inputs: StepInputs,
    ) -> Result<StepOutcome, Report<StepError>>;
}

/// A registry entry.
#[derive(Clone)]
pub struct RegisteredStep {
    /// Declared inputs and outputs.
    pub spec: StepSpec,
    /// Implementation.
    pub handler: Arc<dyn StepHandler>,
}

/// Step type id to spec and handler.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: BTreeMap<String, RegisteredStep>,
}

impl StepRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step type.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateStep` if the id is taken.
    pub fn register(
        &mut self,
        type_id: impl Into<String>,
        spec: StepSpec,
        handler: Arc<dyn StepHandler>,
    ) -> Result<(), Report<RegistryError>> {
        let type_id = type_id.into();
        if self.steps.contains_key(&type_id) {
            return Err(RegistryError::DuplicateStep { type_id }.into());
        }
        self.steps.insert(type_id, RegisteredStep { spec, handler });
        Ok(())
    }

    /// Looks up a step type.
    #[must_use]
    pub fn get(&self, type_id: &str) -> Option<&RegisteredStep> {
        self.steps.get(type_id)
    }

    /// Every registered spec, by type id.
    pub fn specs(&self) -> impl Iterator<Item = (&str, &StepSpec)> {
        self.steps.iter().map(|(id, step)| (id.as_str(), &step.spec))
    }

    /// Number of registered step types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.steps.keys()).finish()
    }
}
