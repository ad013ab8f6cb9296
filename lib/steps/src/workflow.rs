//! Trigger functions that start workflow runs.
//!
//! Each start function seeds `trigger.*` outputs from its event and starts
//! the run as the workflow's creator. A trigger whose workflow no longer
//! exists deletes itself.

use async_trait::async_trait;
use rootcause::Report;
use tidewater_scheduler::{FunctionError, InboundEvent, TriggerFunction};
use tidewater_workflow::template::user_ping;
use tidewater_workflow::{Engine, StartOptions, Trigger};
use tracing::{debug, info, instrument};

use crate::chat::MessageRef;

pub const EXECUTE_MESSAGE: &str = "workflow.execute.message";
pub const EXECUTE_REACTION: &str = "workflow.execute.reaction";
pub const EXECUTE_MEMBER_JOIN: &str = "workflow.execute.member_join";
pub const EXECUTE_CRON: &str = "workflow.execute.cron";

/// Message subtypes that still start message-triggered workflows.
const STARTING_SUBTYPES: [&str; 2] = ["file_share", "me_message"];

/// The event a [`StartWorkflow`] function reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOn {
    Message,
    Reaction,
    MemberJoin,
    Schedule,
}

impl StartOn {
    /// The registered function name.
    #[must_use]
    pub fn function_name(self) -> &'static str {
        match self {
            Self::Message => EXECUTE_MESSAGE,
            Self::Reaction => EXECUTE_REACTION,
            Self::MemberJoin => EXECUTE_MEMBER_JOIN,
            Self::Schedule => EXECUTE_CRON,
        }
    }

    /// Start options for `event`, or `None` if the event should not start a run.
    fn options(self, event: &InboundEvent) -> Result<Option<StartOptions>, FunctionError> {
        let seeded = match (self, event) {
            (
                Self::Message,
                InboundEvent::Message {
                    channel,
                    user,
                    ts,
                    subtype,
                },
            ) => {
                if subtype
                    .as_deref()
                    .is_some_and(|s| !STARTING_SUBTYPES.contains(&s))
                {
                    return Ok(None);
                }
                message_options(channel, ts)
                    .with_output("message.user", user)
                    .with_output("message.user_ping", user_ping(user))
            }
            (
                Self::Reaction,
                InboundEvent::ReactionAdded {
                    channel, ts, user, ..
                },
            ) => message_options(channel, ts)
                .with_output("user", user)
                .with_output("user_ping", user_ping(user)),
            (Self::MemberJoin, InboundEvent::MemberJoined { channel, user }) => {
                StartOptions::default()
                    .with_output("channel", channel)
                    .with_output("user", user)
                    .with_output("user_ping", user_ping(user))
            }
            (Self::Schedule, InboundEvent::ScheduleTick { .. }) => StartOptions::default(),
            (expected, other) => {
                return Err(FunctionError::InvalidEvent {
                    reason: format!(
                        "{} cannot start from a {} event",
                        expected.function_name(),
                        other.kind()
                    ),
                });
            }
        };
        Ok(Some(seeded))
    }
}

fn message_options(channel: &str, ts: &str) -> StartOptions {
    let message = MessageRef {
        channel: channel.to_string(),
        ts: ts.to_string(),
    };
    StartOptions::default().with_output("message", message.to_value())
}

/// Starts the trigger's workflow.
pub struct StartWorkflow {
    on: StartOn,
}

impl StartWorkflow {
    #[must_use]
    pub fn new(on: StartOn) -> Self {
        Self { on }
    }
}

#[async_trait]
impl TriggerFunction for StartWorkflow {
    #[instrument(skip_all, fields(trigger_id = %trigger.id, function = self.on.function_name()))]
    async fn call(
        &self,
        engine: &Engine,
        trigger: &Trigger,
        event: &InboundEvent,
    ) -> Result<(), Report<FunctionError>> {
        let Some(options) = self.on.options(event)? else {
            debug!(event = event.kind(), "event does not start a run");
            return Ok(());
        };
        let Some(workflow_id) = trigger.workflow_id() else {
            return Err(FunctionError::InvalidDetails {
                trigger_id: trigger.id,
                reason: "trigger does not target a workflow".to_string(),
            }
            .into());
        };

        let engine_failure = |e: Report<_>| FunctionError::Engine {
            reason: e.to_string(),
        };
        let Some(workflow) = engine.workflow(workflow_id).await.map_err(engine_failure)? else {
            info!(%workflow_id, "workflow is gone, deleting its trigger");
            engine
                .triggers()
                .delete(trigger.id)
                .await
                .map_err(|e| FunctionError::Engine {
                    reason: e.to_string(),
                })?;
            return Ok(());
        };

        let started = engine
            .start_execution(&workflow, &workflow.creator_user_id, options)
            .await
            .map_err(engine_failure)?;
        debug!(execution_id = %started.execution.id, outcome = ?started.outcome, "started run");
        Ok(())
    }
}
