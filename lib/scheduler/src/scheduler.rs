//! The periodic scheduler.
//!
//! Each tick fires time triggers whose fire time has passed and cron
//! triggers whose schedule had an occurrence since the previous tick.
//! Firing goes through the dispatcher, so one-shot time triggers are
//! deleted after their function runs.

use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::ScheduleError;
use crate::event::InboundEvent;
use crate::schedule::CronSchedule;
use chrono::{DateTime, Utc};
use rootcause::Report;
use std::time::Duration;
use tidewater_workflow::TriggerType;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Fires scheduled triggers on an interval.
#[derive(Debug, Clone)]
pub struct Scheduler {
    dispatcher: Dispatcher,
    interval: Duration,
}

impl Scheduler {
    /// Creates a scheduler that ticks every `interval`.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
        }
    }

    /// Ticks until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = Utc::now();
        info!(interval_ms = self.interval.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    match self.tick(last, now).await {
                        Ok(report) if report.matched > 0 => {
                            debug!(fired = report.fired, failed = report.failed, "scheduler tick");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "scheduler tick failed"),
                    }
                    last = now;
                }
                _ = shutdown.recv() => {
                    info!("scheduler stopping");
                    return;
                }
            }
        }
    }

    /// Fires everything due in `(last, now]`.
    ///
    /// Time triggers are fired when their fire time is at or before `now`,
    /// including ones missed while the process was down. Cron triggers with
    /// an unparsable schedule are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError::Store` if due triggers cannot be loaded.
    #[instrument(skip(self))]
    pub async fn tick(
        &self,
        last: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, Report<ScheduleError>> {
        let store = self.dispatcher.engine().triggers();
        let mut due = store
            .due_time_triggers(now)
            .await
            .map_err(|e| ScheduleError::Store {
                reason: e.to_string(),
            })?;

        let cron = store
            .list_by_type(TriggerType::Cron)
            .await
            .map_err(|e| ScheduleError::Store {
                reason: e.to_string(),
            })?;
        for trigger in cron {
            let expression = trigger.correlation.key();
            match CronSchedule::parse(&expression) {
                Ok(schedule) if schedule.fires_between(last, now) => due.push(trigger),
                Ok(_) => {}
                Err(e) => warn!(trigger_id = %trigger.id, error = %e, "skipping cron trigger"),
            }
        }

        if due.is_empty() {
            return Ok(DispatchReport::default());
        }
        let event = InboundEvent::ScheduleTick { fired_at: now };
        Ok(self.dispatcher.fire_all(&due, &event).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FunctionError;
    use crate::function::{TriggerFunction, TriggerFunctionRegistry};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tidewater_core::{ExecutionId, WorkflowId};
    use tidewater_workflow::{
        AcceptAllFunctions, Correlation, Engine, MemoryExecutionStore, MemoryTriggerStore,
        MemoryWorkflowStore, StepRegistry, Trigger, TriggerStore, TriggerTarget,
    };

    #[derive(Default)]
    struct Count(AtomicUsize);

    #[async_trait]
    impl TriggerFunction for Count {
        async fn call(
            &self,
            _engine: &Engine,
            _trigger: &Trigger,
            event: &InboundEvent,
        ) -> Result<(), Report<FunctionError>> {
            assert!(matches!(event, InboundEvent::ScheduleTick { .. }));
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup() -> (Scheduler, Arc<MemoryTriggerStore>, Arc<Count>) {
        let triggers = Arc::new(MemoryTriggerStore::new());
        let engine = Engine::new(
            Arc::new(MemoryWorkflowStore::new()),
            Arc::new(MemoryExecutionStore::new()),
            triggers.clone(),
            StepRegistry::new(),
            Arc::new(AcceptAllFunctions),
        );
        let count = Arc::new(Count::default());
        let mut functions = TriggerFunctionRegistry::new();
        functions.register("count", count.clone()).expect("register");
        let dispatcher = Dispatcher::new(engine, Arc::new(functions));
        (
            Scheduler::new(dispatcher, std::time::Duration::from_millis(10)),
            triggers,
            count,
        )
    }

    #[tokio::test]
    async fn due_time_triggers_fire_once() {
        let (scheduler, triggers, count) = setup();
        let now = Utc::now();
        for offset in [-1, 60] {
            let trigger = Trigger::new(
                Correlation::Time {
                    fire_at: now + ChronoDuration::seconds(offset),
                },
                TriggerTarget::Execution(ExecutionId::new()),
                "count",
                json!({}),
            )
            .expect("trigger");
            triggers.create(&trigger).await.expect("create");
        }

        let first = scheduler.tick(now - ChronoDuration::seconds(1), now).await.expect("tick");
        let second = scheduler.tick(now, now).await.expect("tick");

        assert_eq!(first.fired, 1);
        assert_eq!(second.matched, 0);
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
        assert_eq!(triggers.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn cron_triggers_fire_when_window_contains_occurrence() {
        let (scheduler, triggers, count) = setup();
        let trigger = Trigger::new(
            Correlation::Cron {
                schedule: "0 7 * * *".to_string(),
            },
            TriggerTarget::Workflow(WorkflowId::new()),
            "count",
            json!({}),
        )
        .expect("trigger");
        triggers.create(&trigger).await.expect("create");

        let seven = Utc.with_ymd_and_hms(2024, 5, 6, 7, 0, 0).single().expect("valid");
        let before = seven - ChronoDuration::seconds(1);
        let after = seven + ChronoDuration::seconds(1);

        scheduler.tick(before, seven).await.expect("tick");
        scheduler.tick(seven, after).await.expect("tick");

        assert_eq!(count.0.load(Ordering::SeqCst), 1);
        assert_eq!(triggers.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (scheduler, _triggers, _count) = setup();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(rx));
        tx.send(()).expect("send shutdown");
        handle.await.expect("scheduler task");
    }
}
