//! The form step: opens a modal and resumes when it is submitted.

use crate::chat::ChatClient;
use crate::resume::ResumeDetails;
use crate::{require, rich_text_blocks};
use async_trait::async_trait;
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tidewater_scheduler::{FunctionError, InboundEvent, TriggerFunction};
use tidewater_workflow::{
    Correlation, DataType, Engine, IoSpec, StepContext, StepError, StepHandler, StepInputs,
    StepOutcome, StepSpec, Trigger,
};
use tracing::{debug, instrument};
use ulid::Ulid;

pub const FORM_COLLECT: &str = "form-collect";
pub const FORM_SUBMIT: &str = "steps.form-collect.submit";

/// Longest title the platform accepts on a modal.
const MAX_TITLE_CHARS: usize = 24;

/// Callback id the event layer uses to recognise step-opened modals.
pub const MODAL_CALLBACK_ID: &str = "trigger";

pub struct FormCollect {
    chat: Arc<dyn ChatClient>,
}

impl FormCollect {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    #[must_use]
    pub fn spec() -> StepSpec {
        StepSpec::new("Collect info in a form", "Forms")
            .input("title", IoSpec::required("Form title", DataType::Text))
            .input("body", IoSpec::optional("Form body text", DataType::RichText))
            .input(
                "questions",
                IoSpec::required("Questions", DataType::Text).with_description(
                    "Enter your questions in a JSON array format, like this: \
                     `[\"What do you like?\", \"Why are you here?\"]`",
                ),
            )
            .output(
                "0",
                IoSpec::required("Responses (change `.0` for other answers)", DataType::Text),
            )
            .with_dynamic_outputs()
    }
}

fn modal_view(modal_id: &str, title: &str, body: Vec<JsonValue>, questions: &[String]) -> JsonValue {
    let inputs = questions.iter().enumerate().map(|(i, question)| {
        json!({
            "type": "input",
            "block_id": i.to_string(),
            "label": { "type": "plain_text", "text": question },
            "element": { "type": "plain_text_input", "action_id": "value" },
        })
    });
    let blocks: Vec<JsonValue> = body.into_iter().chain(inputs).collect();

    json!({
        "type": "modal",
        "title": { "type": "plain_text", "text": title },
        "submit": { "type": "plain_text", "text": "Submit" },
        "callback_id": MODAL_CALLBACK_ID,
        "private_metadata": json!({ "id": modal_id }).to_string(),
        "blocks": blocks,
    })
}

#[async_trait]
impl StepHandler for FormCollect {
    async fn run(
        &self,
        ctx: &mut StepContext,
        inputs: StepInputs,
    ) -> Result<StepOutcome, Report<StepError>> {
        if !ctx.has_interaction() {
            return Err(StepError::Unavailable {
                reason: "the form action can only be run from an interaction, such as a button click"
                    .to_string(),
            }
            .into());
        }

        let title = require(&inputs, "title")?;
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(StepError::InvalidInput {
                input: "title".to_string(),
                reason: format!("the form title must be {MAX_TITLE_CHARS} characters or less"),
            }
            .into());
        }
        let questions: Vec<String> = serde_json::from_str(require(&inputs, "questions")?)
            .map_err(|e| StepError::InvalidInput {
                input: "questions".to_string(),
                reason: format!("expected a JSON array of strings: {e}"),
            })?;
        let body = if inputs.get("body").is_some_and(|b| !b.trim().is_empty()) {
            rich_text_blocks(&inputs, "body")?
        } else {
            Vec::new()
        };

        let modal_id = Ulid::new().to_string().to_ascii_lowercase();
        let view = modal_view(&modal_id, title, body, &questions);

        let Some(interaction) = ctx.take_interaction() else {
            return Err(StepError::Unavailable {
                reason: "interaction was already used".to_string(),
            }
            .into());
        };
        self.chat
            .open_view(&ctx.access_token, &interaction, view)
            .await
            .map_err(StepError::from)?;

        ctx.register_resumption(
            Correlation::Modal {
                id: modal_id.clone(),
            },
            FORM_SUBMIT,
            ResumeDetails::new(&ctx.step_id).to_json(),
        )
        .await?;
        debug!(modal_id, questions = questions.len(), "opened form");
        Ok(StepOutcome::Suspended)
    }
}

/// Completes the form step with the submitted answers.
///
/// Outputs are keyed by question index. The submission's interaction id is
/// handed on, so a following step can open another modal.
pub struct FormSubmit;

#[async_trait]
impl TriggerFunction for FormSubmit {
    #[instrument(skip_all, fields(trigger_id = %trigger.id))]
    async fn call(
        &self,
        engine: &Engine,
        trigger: &Trigger,
        event: &InboundEvent,
    ) -> Result<(), Report<FunctionError>> {
        let InboundEvent::ViewSubmission {
            values,
            interaction_id,
            ..
        } = event
        else {
            return Err(FunctionError::InvalidEvent {
                reason: format!("expected a view submission, got {}", event.kind()),
            }
            .into());
        };
        let (execution_id, details) = ResumeDetails::from_trigger(trigger)?;

        let outcome = engine
            .advance_with(
                execution_id,
                &details.step_id,
                values.clone(),
                interaction_id.clone(),
            )
            .await
            .map_err(|e| FunctionError::Engine {
                reason: e.to_string(),
            })?;
        debug!(?outcome, "form submitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::RecordingChat;
    use crate::tests::{context_with, rich};
    use tidewater_workflow::{MemoryTriggerStore, TriggerStore, TriggerType};

    fn inputs(title: &str, questions: &str) -> StepInputs {
        StepInputs::from([
            ("title".to_string(), title.to_string()),
            ("body".to_string(), rich("Tell us")),
            ("questions".to_string(), questions.to_string()),
        ])
    }

    #[tokio::test]
    async fn needs_an_interaction() {
        let chat = Arc::new(RecordingChat::default());
        let step = FormCollect::new(chat.clone());
        let mut ctx = context_with(Arc::new(MemoryTriggerStore::new()), None);

        let result = step.run(&mut ctx, inputs("Survey", r#"["Why?"]"#)).await;
        assert!(result.is_err());
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn long_title_is_rejected_without_using_interaction() {
        let chat = Arc::new(RecordingChat::default());
        let step = FormCollect::new(chat);
        let mut ctx = context_with(Arc::new(MemoryTriggerStore::new()), Some("I1".to_string()));

        let result = step
            .run(&mut ctx, inputs("A title that is far too long for a modal", r#"["Why?"]"#))
            .await;
        assert!(result.is_err());
        assert!(ctx.has_interaction());
    }

    #[tokio::test]
    async fn opens_modal_and_registers_modal_trigger() {
        let chat = Arc::new(RecordingChat::default());
        let triggers = Arc::new(MemoryTriggerStore::new());
        let step = FormCollect::new(chat.clone());
        let mut ctx = context_with(triggers.clone(), Some("I1".to_string()));

        let outcome = step
            .run(&mut ctx, inputs("Survey", r#"["Favourite colour?", "Why?"]"#))
            .await
            .expect("run");
        assert_eq!(outcome, StepOutcome::Suspended);
        assert!(!ctx.has_interaction());

        let calls = chat.calls();
        assert_eq!(calls[0].0, "views.open");
        assert_eq!(calls[0].1["trigger_id"], "I1");
        let view = &calls[0].1["view"];
        assert_eq!(view["callback_id"], MODAL_CALLBACK_ID);
        let blocks = view["blocks"].as_array().expect("blocks");
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2]["block_id"], "1");

        let metadata: JsonValue = serde_json::from_str(
            view["private_metadata"].as_str().expect("metadata"),
        )
        .expect("metadata json");
        let modal_id = metadata["id"].as_str().expect("id");
        let found = triggers
            .find(TriggerType::Modal, modal_id)
            .await
            .expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].function, FORM_SUBMIT);
    }

    #[tokio::test]
    async fn questions_must_be_a_json_array() {
        let chat = Arc::new(RecordingChat::default());
        let step = FormCollect::new(chat);
        let mut ctx = context_with(Arc::new(MemoryTriggerStore::new()), Some("I1".to_string()));

        let result = step.run(&mut ctx, inputs("Survey", "Why?")).await;
        assert!(result.is_err());
    }
}
