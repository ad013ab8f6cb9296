//! The delay step and its restart function.

use crate::require;
use crate::resume::ResumeDetails;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rootcause::Report;
use tidewater_scheduler::{FunctionError, InboundEvent, TriggerFunction};
use tidewater_workflow::{
    Correlation, DataType, Engine, IoSpec, StepContext, StepError, StepHandler, StepInputs,
    StepOutcome, StepOutputs, StepSpec, Trigger,
};
use tracing::{debug, instrument};

pub const DELAY: &str = "delay";
pub const DELAY_RESTART: &str = "steps.delay.restart";

/// Upper bound on a single delay: one year.
const MAX_DELAY_MS: f64 = 365.0 * 24.0 * 60.0 * 60.0 * 1000.0;

/// Suspends for `ms` milliseconds by registering a time trigger.
pub struct Delay;

impl Delay {
    #[must_use]
    pub fn spec() -> StepSpec {
        StepSpec::new("Delay execution", "Utilities")
            .input("ms", IoSpec::required("Time (in ms)", DataType::Text))
    }
}

#[async_trait]
impl StepHandler for Delay {
    async fn run(
        &self,
        ctx: &mut StepContext,
        inputs: StepInputs,
    ) -> Result<StepOutcome, Report<StepError>> {
        let raw = require(&inputs, "ms")?;
        let ms = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|ms| ms.is_finite())
            .ok_or_else(|| StepError::InvalidInput {
                input: "ms".to_string(),
                reason: format!("failed to parse sleep duration '{raw}'"),
            })?;

        // Negative delays fire on the next scheduler tick.
        #[allow(clippy::cast_possible_truncation)]
        let wait = Duration::milliseconds(ms.max(0.0).min(MAX_DELAY_MS) as i64);
        let fire_at = Utc::now() + wait;
        ctx.register_resumption(
            Correlation::Time { fire_at },
            DELAY_RESTART,
            ResumeDetails::new(&ctx.step_id).to_json(),
        )
        .await?;
        debug!(%fire_at, "delay scheduled");
        Ok(StepOutcome::Suspended)
    }
}

/// Completes the delayed step when its time trigger fires.
pub struct DelayRestart;

#[async_trait]
impl TriggerFunction for DelayRestart {
    #[instrument(skip_all, fields(trigger_id = %trigger.id))]
    async fn call(
        &self,
        engine: &Engine,
        trigger: &Trigger,
        _event: &InboundEvent,
    ) -> Result<(), Report<FunctionError>> {
        let (execution_id, details) = ResumeDetails::from_trigger(trigger)?;
        let outcome = engine
            .advance(execution_id, &details.step_id, StepOutputs::new())
            .await
            .map_err(|e| FunctionError::Engine {
                reason: e.to_string(),
            })?;
        debug!(?outcome, "delay restarted");
        Ok(())
    }
}
