//! Message and reaction steps.

use crate::chat::{ChatClient, MessageRef, tolerate};
use crate::{require, rich_text_blocks};
use async_trait::async_trait;
use rootcause::Report;
use std::sync::Arc;
use tidewater_workflow::{
    DataType, IoSpec, StepContext, StepError, StepHandler, StepInputs, StepOutcome, StepOutputs,
    StepSpec,
};
use tracing::debug;

pub const DM_USER: &str = "dm-user";
pub const MESSAGE_CHANNEL: &str = "message-channel";
pub const REACT_MESSAGE: &str = "react-message";
pub const UNREACT_MESSAGE: &str = "unreact-message";
pub const SEND_EPHEMERAL: &str = "send-ephemeral";

const CATEGORY: &str = "Messages";

/// Where [`PostMessage`] sends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// A direct message; the `user_id` input is the channel.
    User,
    /// The `channel` input.
    Channel,
}

impl Recipient {
    fn input(self) -> &'static str {
        match self {
            Self::User => "user_id",
            Self::Channel => "channel",
        }
    }

    /// Spec of the step posting to this recipient.
    #[must_use]
    pub fn spec(self) -> StepSpec {
        let (name, target) = match self {
            Self::User => (
                "Send a message to a person",
                IoSpec::required("User", DataType::User),
            ),
            Self::Channel => (
                "Send a message to a channel",
                IoSpec::required("Channel", DataType::Channel),
            ),
        };
        StepSpec::new(name, CATEGORY)
            .input(self.input(), target)
            .input("message", IoSpec::required("Message", DataType::RichText))
            .output("message", IoSpec::required("Sent message", DataType::Message))
    }
}

/// Posts a rich text message and outputs a reference to it.
pub struct PostMessage {
    chat: Arc<dyn ChatClient>,
    recipient: Recipient,
}

impl PostMessage {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatClient>, recipient: Recipient) -> Self {
        Self { chat, recipient }
    }
}

#[async_trait]
impl StepHandler for PostMessage {
    async fn run(
        &self,
        ctx: &mut StepContext,
        inputs: StepInputs,
    ) -> Result<StepOutcome, Report<StepError>> {
        let channel = require(&inputs, self.recipient.input())?;
        let blocks = rich_text_blocks(&inputs, "message")?;

        let posted = self
            .chat
            .post_message(&ctx.access_token, channel, blocks)
            .await
            .map_err(StepError::from)?;
        debug!(channel = %posted.channel, ts = %posted.ts, "posted message");

        let mut outputs = StepOutputs::new();
        outputs.insert("message".to_string(), posted.to_value());
        Ok(StepOutcome::Completed(outputs))
    }
}

/// Whether [`Reaction`] adds or removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    Add,
    Remove,
}

impl ReactionChange {
    /// Spec of the step making this change.
    #[must_use]
    pub fn spec(self) -> StepSpec {
        let name = match self {
            Self::Add => "Add a reaction to a message",
            Self::Remove => "Remove a reaction from a message",
        };
        StepSpec::new(name, CATEGORY)
            .input("message", IoSpec::required("Message", DataType::Message))
            .input(
                "emoji",
                IoSpec::required("Emoji", DataType::Text)
                    .with_description("Emoji name (without colons)"),
            )
    }

    /// Error code meaning the change was already in effect.
    fn conflict_code(self) -> &'static str {
        match self {
            Self::Add => "already_reacted",
            Self::Remove => "no_reaction",
        }
    }
}

/// Adds or removes a reaction. Already being in the target state is success.
pub struct Reaction {
    chat: Arc<dyn ChatClient>,
    change: ReactionChange,
}

impl Reaction {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatClient>, change: ReactionChange) -> Self {
        Self { chat, change }
    }
}

#[async_trait]
impl StepHandler for Reaction {
    async fn run(
        &self,
        ctx: &mut StepContext,
        inputs: StepInputs,
    ) -> Result<StepOutcome, Report<StepError>> {
        let message = MessageRef::parse("message", require(&inputs, "message")?)?;
        let emoji = require(&inputs, "emoji")?.trim_matches(':');

        let result = match self.change {
            ReactionChange::Add => {
                self.chat
                    .add_reaction(&ctx.access_token, &message, emoji)
                    .await
            }
            ReactionChange::Remove => {
                self.chat
                    .remove_reaction(&ctx.access_token, &message, emoji)
                    .await
            }
        };
        tolerate(result, self.change.conflict_code()).map_err(StepError::from)?;
        Ok(StepOutcome::done())
    }
}

/// Posts a message only `user` can see.
pub struct SendEphemeral {
    chat: Arc<dyn ChatClient>,
}

impl SendEphemeral {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    #[must_use]
    pub fn spec() -> StepSpec {
        StepSpec::new("Send an \"only visible to you\" message", CATEGORY)
            .input("channel", IoSpec::required("Channel", DataType::Channel))
            .input("user", IoSpec::required("User", DataType::User))
            .input("message", IoSpec::required("Message", DataType::RichText))
    }
}

#[async_trait]
impl StepHandler for SendEphemeral {
    async fn run(
        &self,
        ctx: &mut StepContext,
        inputs: StepInputs,
    ) -> Result<StepOutcome, Report<StepError>> {
        let channel = require(&inputs, "channel")?;
        let user = require(&inputs, "user")?;
        let blocks = rich_text_blocks(&inputs, "message")?;

        self.chat
            .post_ephemeral(&ctx.access_token, channel, user, blocks)
            .await
            .map_err(StepError::from)?;
        Ok(StepOutcome::done())
    }
}
