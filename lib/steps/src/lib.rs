//! Built-in steps and trigger functions for tidewater.
//!
//! - **Messages**: post, react, unreact, ephemeral
//! - **Channels**: invite, archive, create
//! - **Utilities**: `delay`, resumed by a time trigger
//! - **Forms**: `form-collect`, resumed by a modal submission
//! - **Workflow starts**: the functions bound to message, reaction,
//!   member-join and cron triggers
//!
//! Steps reach the chat platform through [`ChatClient`]; the worker supplies
//! the real implementation.

pub mod channels;
pub mod chat;
pub mod delay;
pub mod forms;
pub mod messages;
pub mod resume;
pub mod workflow;

pub use chat::{ChatClient, ChatError, MessageRef};
pub use workflow::{StartOn, StartWorkflow};

use rootcause::Report;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tidewater_scheduler::TriggerFunctionRegistry;
use tidewater_workflow::{RegistryError, StepError, StepInputs, StepRegistry};

/// Registers every built-in step type.
///
/// # Errors
///
/// Returns `RegistryError::DuplicateStep` if a built-in id is already taken.
pub fn register_builtin_steps(
    registry: &mut StepRegistry,
    chat: Arc<dyn ChatClient>,
) -> Result<(), Report<RegistryError>> {
    use channels::{ArchiveChannel, CreateChannel, InviteToChannel};
    use messages::{PostMessage, Reaction, ReactionChange, Recipient, SendEphemeral};

    for recipient in [Recipient::User, Recipient::Channel] {
        let type_id = match recipient {
            Recipient::User => messages::DM_USER,
            Recipient::Channel => messages::MESSAGE_CHANNEL,
        };
        registry.register(
            type_id,
            recipient.spec(),
            Arc::new(PostMessage::new(chat.clone(), recipient)),
        )?;
    }
    for change in [ReactionChange::Add, ReactionChange::Remove] {
        let type_id = match change {
            ReactionChange::Add => messages::REACT_MESSAGE,
            ReactionChange::Remove => messages::UNREACT_MESSAGE,
        };
        registry.register(
            type_id,
            change.spec(),
            Arc::new(Reaction::new(chat.clone(), change)),
        )?;
    }
    registry.register(
        messages::SEND_EPHEMERAL,
        SendEphemeral::spec(),
        Arc::new(SendEphemeral::new(chat.clone())),
    )?;

    registry.register(
        channels::CHANNEL_INVITE,
        InviteToChannel::spec(),
        Arc::new(InviteToChannel::new(chat.clone())),
    )?;
    registry.register(
        channels::ARCHIVE_CHANNEL,
        ArchiveChannel::spec(),
        Arc::new(ArchiveChannel::new(chat.clone())),
    )?;
    registry.register(
        channels::CREATE_PUBLIC_CHANNEL,
        CreateChannel::spec(false),
        Arc::new(CreateChannel::new(chat.clone(), false)),
    )?;
    registry.register(
        channels::CREATE_PRIVATE_CHANNEL,
        CreateChannel::spec(true),
        Arc::new(CreateChannel::new(chat.clone(), true)),
    )?;

    registry.register(delay::DELAY, delay::Delay::spec(), Arc::new(delay::Delay))?;
    registry.register(
        forms::FORM_COLLECT,
        forms::FormCollect::spec(),
        Arc::new(forms::FormCollect::new(chat)),
    )?;
    Ok(())
}

/// Registers every built-in trigger function.
///
/// # Errors
///
/// Returns `RegistryError::DuplicateFunction` if a built-in name is taken.
pub fn register_builtin_functions(
    functions: &mut TriggerFunctionRegistry,
) -> Result<(), Report<tidewater_scheduler::RegistryError>> {
    for on in [
        StartOn::Message,
        StartOn::Reaction,
        StartOn::MemberJoin,
        StartOn::Schedule,
    ] {
        functions.register(on.function_name(), Arc::new(StartWorkflow::new(on)))?;
    }
    functions.register(delay::DELAY_RESTART, Arc::new(delay::DelayRestart))?;
    functions.register(forms::FORM_SUBMIT, Arc::new(forms::FormSubmit))?;
    Ok(())
}

/// A non-blank input value.
pub(crate) fn require<'a>(inputs: &'a StepInputs, key: &str) -> Result<&'a str, StepError> {
    inputs
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| StepError::InvalidInput {
            input: key.to_string(),
            reason: "a value is required".to_string(),
        })
}

/// A rich text input as a one-block list, ready to post.
pub(crate) fn rich_text_blocks(inputs: &StepInputs, key: &str) -> Result<Vec<JsonValue>, StepError> {
    let raw = require(inputs, key)?;
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(block @ JsonValue::Object(_)) => Ok(vec![block]),
        Ok(_) => Err(StepError::InvalidInput {
            input: key.to_string(),
            reason: "expected a rich text block".to_string(),
        }),
        Err(e) => Err(StepError::InvalidInput {
            input: key.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chat::testing::RecordingChat;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use std::time::Duration;
    use tidewater_core::{ExecutionId, WorkflowId};
    use tidewater_scheduler::{Dispatcher, InboundEvent, Scheduler};
    use tidewater_workflow::{
        AcceptAllFunctions, Correlation, Engine, MemoryExecutionStore, MemoryTriggerStore,
        MemoryWorkflowStore, RunOutcome, StartOptions, Step, StepContext, Trigger,
        TriggerStore, TriggerTarget, TriggerType, Workflow,
    };

    pub(crate) fn context_with(
        triggers: Arc<MemoryTriggerStore>,
        interaction: Option<String>,
    ) -> StepContext {
        StepContext::new(
            ExecutionId::new(),
            WorkflowId::new(),
            "s1",
            "U1",
            "xoxb-test",
            interaction,
            triggers,
            Arc::new(AcceptAllFunctions),
        )
    }

    pub(crate) fn context() -> StepContext {
        context_with(Arc::new(MemoryTriggerStore::new()), None)
    }

    pub(crate) fn rich(text: &str) -> String {
        json!({
            "type": "rich_text",
            "elements": [{"type": "rich_text_section", "elements": [{"type": "text", "text": text}]}]
        })
        .to_string()
    }

    struct Harness {
        chat: Arc<RecordingChat>,
        workflows: Arc<MemoryWorkflowStore>,
        executions: Arc<MemoryExecutionStore>,
        triggers: Arc<MemoryTriggerStore>,
        dispatcher: Dispatcher,
    }

    fn harness() -> Harness {
        let chat = Arc::new(RecordingChat::default());
        let mut steps = StepRegistry::new();
        register_builtin_steps(&mut steps, chat.clone()).expect("steps");
        let mut functions = TriggerFunctionRegistry::new();
        register_builtin_functions(&mut functions).expect("functions");
        let functions = Arc::new(functions);

        let workflows = Arc::new(MemoryWorkflowStore::new());
        let executions = Arc::new(MemoryExecutionStore::new());
        let triggers = Arc::new(MemoryTriggerStore::new());
        let engine = Engine::new(
            workflows.clone(),
            executions.clone(),
            triggers.clone(),
            steps,
            functions.clone(),
        );
        Harness {
            chat,
            workflows,
            executions,
            triggers,
            dispatcher: Dispatcher::new(engine, functions),
        }
    }

    #[test]
    fn builtins_register_without_collisions() {
        let mut steps = StepRegistry::new();
        register_builtin_steps(&mut steps, Arc::new(RecordingChat::default())).expect("steps");
        assert_eq!(steps.len(), 11);

        let mut functions = TriggerFunctionRegistry::new();
        register_builtin_functions(&mut functions).expect("functions");
        assert_eq!(functions.names().count(), 6);
        assert!(register_builtin_functions(&mut functions).is_err());
    }

    #[tokio::test]
    async fn delay_then_direct_message() {
        let h = harness();
        let workflow = Workflow::new("greet", "U9")
            .with_access_token("xoxb-1")
            .with_step(Step::with_id("wait", delay::DELAY).with_input("ms", "1000"))
            .with_step(
                Step::with_id("dm", messages::DM_USER)
                    .with_input("user_id", "$!{ctx.trigger_user_id}")
                    .with_input("message", rich("Hi $!{ctx.trigger_user_ping}!")),
            );
        h.workflows.insert(workflow.clone()).await;

        let started = h
            .dispatcher
            .engine()
            .start_execution(&workflow, "U1", StartOptions::default())
            .await
            .expect("start");
        assert_eq!(started.outcome, RunOutcome::Suspended { step_index: 0 });
        assert!(h.chat.calls().is_empty());

        let time = h
            .triggers
            .list_by_type(TriggerType::Time)
            .await
            .expect("list");
        assert_eq!(time.len(), 1);
        let Correlation::Time { fire_at } = time[0].correlation else {
            panic!("expected a time trigger");
        };

        let scheduler = Scheduler::new(h.dispatcher.clone(), Duration::from_secs(1));
        let early = scheduler
            .tick(fire_at - ChronoDuration::seconds(2), fire_at - ChronoDuration::milliseconds(1))
            .await
            .expect("tick");
        assert_eq!(early.matched, 0);

        let report = scheduler
            .tick(fire_at - ChronoDuration::seconds(1), fire_at)
            .await
            .expect("tick");
        assert_eq!(report.fired, 1);

        let calls = h.chat.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "chat.postMessage");
        assert_eq!(calls[0].1["channel"], "U1");
        let posted = calls[0].1["blocks"].to_string();
        assert!(posted.contains(r#""user_id":"U1""#));
        assert!(!posted.contains("$!{"));

        assert!(h.executions.is_empty().await);
        assert!(h.triggers.list_all().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn form_answers_flow_into_next_step() {
        let h = harness();
        let workflow = Workflow::new("survey", "U9")
            .with_access_token("xoxb-1")
            .with_step(
                Step::with_id("form", forms::FORM_COLLECT)
                    .with_input("title", "Survey")
                    .with_input("questions", r#"["Favourite colour?"]"#),
            )
            .with_step(
                Step::with_id("post", messages::MESSAGE_CHANNEL)
                    .with_input("channel", "C1")
                    .with_input("message", rich("Answer: $!{outputs.form.0}")),
            );
        h.workflows.insert(workflow.clone()).await;

        h.dispatcher
            .engine()
            .start_execution(
                &workflow,
                "U1",
                StartOptions::default().with_interaction(Some("I1".to_string())),
            )
            .await
            .expect("start");

        let modal = h
            .triggers
            .list_by_type(TriggerType::Modal)
            .await
            .expect("list");
        assert_eq!(modal.len(), 1);

        let submission = InboundEvent::ViewSubmission {
            modal_id: modal[0].correlation.key(),
            user: "U1".to_string(),
            interaction_id: Some("I2".to_string()),
            values: [("0".to_string(), "blue".to_string())].into(),
        };
        let report = h.dispatcher.dispatch(&submission).await.expect("dispatch");
        assert_eq!(report.fired, 1);

        // A second delivery finds no trigger.
        let again = h.dispatcher.dispatch(&submission).await.expect("dispatch");
        assert_eq!(again.matched, 0);

        let calls = h.chat.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "chat.postMessage");
        assert!(calls[1].1["blocks"].to_string().contains("Answer: blue"));
        assert!(h.executions.is_empty().await);
    }

    async fn bind(h: &Harness, workflow: &Workflow, correlation: Correlation, on: StartOn) -> Trigger {
        let trigger = Trigger::new(
            correlation,
            TriggerTarget::Workflow(workflow.id),
            on.function_name(),
            json!({}),
        )
        .expect("trigger");
        h.triggers.create(&trigger).await.expect("create");
        trigger
    }

    #[tokio::test]
    async fn message_trigger_starts_run_with_seeded_message() {
        let h = harness();
        let workflow = Workflow::new("ack", "U9")
            .with_access_token("xoxb-1")
            .with_step(
                Step::with_id("react", messages::REACT_MESSAGE)
                    .with_input("message", "$!{outputs.trigger.message}")
                    .with_input("emoji", "eyes"),
            );
        h.workflows.insert(workflow.clone()).await;
        bind(
            &h,
            &workflow,
            Correlation::Message {
                channel: "C1".to_string(),
            },
            StartOn::Message,
        )
        .await;

        let bot = InboundEvent::Message {
            channel: "C1".to_string(),
            user: "U2".to_string(),
            ts: "1.0".to_string(),
            subtype: Some("bot_message".to_string()),
        };
        let report = h.dispatcher.dispatch(&bot).await.expect("dispatch");
        assert_eq!(report.fired, 1);
        assert!(h.chat.calls().is_empty());

        let posted = InboundEvent::Message {
            channel: "C1".to_string(),
            user: "U2".to_string(),
            ts: "1.0".to_string(),
            subtype: None,
        };
        h.dispatcher.dispatch(&posted).await.expect("dispatch");

        let calls = h.chat.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "reactions.add");
        assert_eq!(calls[0].1["channel"], "C1");
        assert_eq!(calls[0].1["ts"], "1.0");

        // The recurring trigger survives.
        assert_eq!(h.triggers.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn member_join_seeds_joining_user() {
        let h = harness();
        let workflow = Workflow::new("welcome", "U9")
            .with_access_token("xoxb-1")
            .with_step(
                Step::with_id("dm", messages::DM_USER)
                    .with_input("user_id", "$!{outputs.trigger.user}")
                    .with_input("message", rich("Welcome to $!{outputs.trigger.channel}")),
            );
        h.workflows.insert(workflow.clone()).await;
        bind(
            &h,
            &workflow,
            Correlation::MemberJoin {
                channel: "C7".to_string(),
            },
            StartOn::MemberJoin,
        )
        .await;

        let event = InboundEvent::MemberJoined {
            channel: "C7".to_string(),
            user: "U5".to_string(),
        };
        h.dispatcher.dispatch(&event).await.expect("dispatch");

        let calls = h.chat.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["channel"], "U5");
        assert!(calls[0].1["blocks"].to_string().contains("Welcome to C7"));
    }

    #[tokio::test]
    async fn trigger_for_deleted_workflow_removes_itself() {
        let h = harness();
        let workflow = Workflow::new("gone", "U9").with_access_token("xoxb-1");
        let trigger = bind(
            &h,
            &workflow,
            Correlation::Reaction {
                channel: "C1".to_string(),
                emoji: "tada".to_string(),
            },
            StartOn::Reaction,
        )
        .await;

        let event = InboundEvent::ReactionAdded {
            channel: "C1".to_string(),
            ts: "1.0".to_string(),
            user: "U2".to_string(),
            reaction: "tada".to_string(),
        };
        let report = h.dispatcher.dispatch(&event).await.expect("dispatch");
        assert_eq!(report.fired, 1);
        assert!(h.triggers.get(trigger.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn cron_trigger_starts_run_on_tick() {
        let h = harness();
        let workflow = Workflow::new("daily", "U9")
            .with_access_token("xoxb-1")
            .with_step(
                Step::with_id("post", messages::MESSAGE_CHANNEL)
                    .with_input("channel", "C1")
                    .with_input("message", rich("Stand-up time")),
            );
        h.workflows.insert(workflow.clone()).await;
        bind(
            &h,
            &workflow,
            Correlation::Cron {
                schedule: "* * * * *".to_string(),
            },
            StartOn::Schedule,
        )
        .await;

        let scheduler = Scheduler::new(h.dispatcher.clone(), Duration::from_secs(1));
        let now = Utc::now();
        let report = scheduler
            .tick(now - ChronoDuration::minutes(2), now)
            .await
            .expect("tick");
        assert_eq!(report.fired, 1);
        assert_eq!(h.chat.calls().len(), 1);
    }
}
