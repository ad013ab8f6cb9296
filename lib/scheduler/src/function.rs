//! The trigger function registry.
//!
//! Functions are registered once per name at startup by whichever crate
//! owns the behavior, then the registry is shared with the dispatcher and,
//! as a [`FunctionResolver`], with the engine. Whether a function starts a
//! workflow or resumes an execution depends only on the trigger it is
//! called with.

use crate::error::{FunctionError, RegistryError};
use crate::event::InboundEvent;
use async_trait::async_trait;
use rootcause::Report;
use std::collections::BTreeMap;
use std::sync::Arc;
use tidewater_workflow::{Engine, FunctionResolver, Trigger};
use tracing::error;

/// Behavior bound to triggers by name.
#[async_trait]
pub trait TriggerFunction: Send + Sync {
    /// Handles a fired trigger.
    async fn call(
        &self,
        engine: &Engine,
        trigger: &Trigger,
        event: &InboundEvent,
    ) -> Result<(), Report<FunctionError>>;
}

/// Name to trigger function.
#[derive(Clone, Default)]
pub struct TriggerFunctionRegistry {
    functions: BTreeMap<String, Arc<dyn TriggerFunction>>,
}

impl TriggerFunctionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateFunction` if the name is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        function: Arc<dyn TriggerFunction>,
    ) -> Result<(), Report<RegistryError>> {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(RegistryError::DuplicateFunction { name }.into());
        }
        self.functions.insert(name, function);
        Ok(())
    }

    /// Looks up a function.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn TriggerFunction>> {
        self.functions.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Checks that every trigger names a registered function.
    ///
    /// Every dangling trigger is logged; the first one is returned.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnresolvedFunction` for a dangling name.
    pub fn verify(&self, triggers: &[Trigger]) -> Result<(), Report<RegistryError>> {
        let mut first = None;
        for trigger in triggers {
            if self.functions.contains_key(&trigger.function) {
                continue;
            }
            error!(
                trigger_id = %trigger.id,
                function = %trigger.function,
                "trigger names an unregistered function"
            );
            first.get_or_insert_with(|| RegistryError::UnresolvedFunction {
                trigger_id: trigger.id,
                name: trigger.function.clone(),
            });
        }
        match first {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl FunctionResolver for TriggerFunctionRegistry {
    fn resolves(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl std::fmt::Debug for TriggerFunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidewater_core::{ExecutionId, WorkflowId};
    use tidewater_workflow::{Correlation, TriggerTarget};

    struct Nothing;

    #[async_trait]
    impl TriggerFunction for Nothing {
        async fn call(
            &self,
            _engine: &Engine,
            _trigger: &Trigger,
            _event: &InboundEvent,
        ) -> Result<(), Report<FunctionError>> {
            Ok(())
        }
    }

    #[test]
    fn names_register_once() {
        let mut registry = TriggerFunctionRegistry::new();
        registry
            .register("workflow.execute.message", Arc::new(Nothing))
            .expect("register");
        assert!(
            registry
                .register("workflow.execute.message", Arc::new(Nothing))
                .is_err()
        );
        assert!(registry.resolves("workflow.execute.message"));
        assert!(!registry.resolves("workflow.execute.cron"));
        assert_eq!(registry.names().collect::<Vec<_>>(), ["workflow.execute.message"]);
    }

    #[test]
    fn verify_reports_dangling_names() {
        let mut registry = TriggerFunctionRegistry::new();
        registry
            .register("steps.delay.restart", Arc::new(Nothing))
            .expect("register");

        let good = Trigger::new(
            Correlation::Time {
                fire_at: chrono::Utc::now(),
            },
            TriggerTarget::Execution(ExecutionId::new()),
            "steps.delay.restart",
            json!({}),
        )
        .expect("trigger");
        assert!(registry.verify(std::slice::from_ref(&good)).is_ok());

        let dangling = Trigger::new(
            Correlation::Message {
                channel: "C1".to_string(),
            },
            TriggerTarget::Workflow(WorkflowId::new()),
            "workflow.execute.gone",
            json!({}),
        )
        .expect("trigger");
        let result = registry.verify(&[good, dangling]);
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("workflow.execute.gone"));
    }
}
