//! Matches events to triggers and calls their functions.

use crate::error::DispatchError;
use crate::event::InboundEvent;
use crate::function::TriggerFunctionRegistry;
use futures::future::join_all;
use rootcause::Report;
use std::sync::Arc;
use tidewater_workflow::{Engine, Trigger};
use tracing::{debug, error, info, instrument, warn};

/// Outcome counts of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Triggers whose correlation matched.
    pub matched: usize,
    /// Functions that returned successfully.
    pub fired: usize,
    /// Functions that failed or could not be found.
    pub failed: usize,
}

/// Routes inbound events to trigger functions.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Engine,
    functions: Arc<TriggerFunctionRegistry>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(engine: Engine, functions: Arc<TriggerFunctionRegistry>) -> Self {
        Self { engine, functions }
    }

    /// The engine functions are called with.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Fires every trigger whose type and correlation key match the event.
    ///
    /// Matches are not deduplicated: distinct workflows may share a channel
    /// or emoji. A failing function does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Store` if the trigger lookup fails.
    #[instrument(skip(self, event), fields(event = event.kind()))]
    pub async fn dispatch(
        &self,
        event: &InboundEvent,
    ) -> Result<DispatchReport, Report<DispatchError>> {
        let Some((trigger_type, key)) = event.correlation() else {
            debug!("event carries no correlation");
            return Ok(DispatchReport::default());
        };
        let triggers = self
            .engine
            .triggers()
            .find(trigger_type, &key)
            .await
            .map_err(|e| DispatchError::Store {
                operation: "find triggers",
                reason: e.to_string(),
            })?;
        debug!(%trigger_type, key = %key, matched = triggers.len(), "matched triggers");
        Ok(self.fire_all(&triggers, event).await)
    }

    /// Fires the given triggers concurrently.
    pub async fn fire_all(&self, triggers: &[Trigger], event: &InboundEvent) -> DispatchReport {
        let results = join_all(triggers.iter().map(|trigger| self.fire(trigger, event))).await;

        let mut report = DispatchReport {
            matched: triggers.len(),
            ..DispatchReport::default()
        };
        for (trigger, result) in triggers.iter().zip(results) {
            match result {
                Ok(()) => report.fired += 1,
                Err(e) => {
                    warn!(trigger_id = %trigger.id, error = %e, "trigger function failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Calls one trigger's function, then deletes the trigger if it is
    /// one-shot. Deleting an already consumed trigger is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::UnknownFunction` for a dangling function name,
    /// `DispatchError::Function` if the function fails and
    /// `DispatchError::Store` if the deletion fails.
    #[instrument(skip(self, trigger, event), fields(trigger_id = %trigger.id, function = %trigger.function))]
    pub async fn fire(
        &self,
        trigger: &Trigger,
        event: &InboundEvent,
    ) -> Result<(), Report<DispatchError>> {
        let Some(function) = self.functions.get(&trigger.function) else {
            error!("trigger names an unregistered function");
            return Err(DispatchError::UnknownFunction {
                trigger_id: trigger.id,
                name: trigger.function.clone(),
            }
            .into());
        };

        info!(trigger_type = %trigger.trigger_type(), "firing trigger");
        let result = function.call(&self.engine, trigger, event).await;

        if trigger.is_one_shot() {
            let deleted = self
                .engine
                .triggers()
                .delete(trigger.id)
                .await
                .map_err(|e| DispatchError::Store {
                    operation: "delete one-shot trigger",
                    reason: e.to_string(),
                })?;
            if !deleted {
                debug!("one-shot trigger was already consumed");
            }
        }

        result.map_err(|e| {
            DispatchError::Function {
                trigger_id: trigger.id,
                reason: e.to_string(),
            }
            .into()
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}
