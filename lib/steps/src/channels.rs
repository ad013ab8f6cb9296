//! Channel management steps.

use crate::chat::{ChatClient, tolerate};
use crate::require;
use async_trait::async_trait;
use rootcause::Report;
use std::sync::Arc;
use tidewater_workflow::{
    DataType, IoSpec, StepContext, StepError, StepHandler, StepInputs, StepOutcome, StepOutputs,
    StepSpec,
};
use tracing::info;

pub const CHANNEL_INVITE: &str = "channel-invite";
pub const ARCHIVE_CHANNEL: &str = "archive-channel";
pub const CREATE_PUBLIC_CHANNEL: &str = "create-public-channel";
pub const CREATE_PRIVATE_CHANNEL: &str = "create-private-channel";

const CATEGORY: &str = "Channels";

/// Invites a user to a channel. A user already in the channel is success.
pub struct InviteToChannel {
    chat: Arc<dyn ChatClient>,
}

impl InviteToChannel {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    #[must_use]
    pub fn spec() -> StepSpec {
        StepSpec::new("Add a user to a channel", CATEGORY)
            .input("channel", IoSpec::required("Channel", DataType::Channel))
            .input("user", IoSpec::required("User", DataType::User))
    }
}

#[async_trait]
impl StepHandler for InviteToChannel {
    async fn run(
        &self,
        ctx: &mut StepContext,
        inputs: StepInputs,
    ) -> Result<StepOutcome, Report<StepError>> {
        let channel = require(&inputs, "channel")?;
        let user = require(&inputs, "user")?;
        let result = self
            .chat
            .invite_to_channel(&ctx.access_token, channel, user)
            .await;
        tolerate(result, "already_in_channel").map_err(StepError::from)?;
        Ok(StepOutcome::done())
    }
}

pub struct ArchiveChannel {
    chat: Arc<dyn ChatClient>,
}

impl ArchiveChannel {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    #[must_use]
    pub fn spec() -> StepSpec {
        StepSpec::new("Archive a channel", CATEGORY)
            .input("channel", IoSpec::required("Channel", DataType::Channel))
    }
}

#[async_trait]
impl StepHandler for ArchiveChannel {
    async fn run(
        &self,
        ctx: &mut StepContext,
        inputs: StepInputs,
    ) -> Result<StepOutcome, Report<StepError>> {
        let channel = require(&inputs, "channel")?;
        let result = self.chat.archive_channel(&ctx.access_token, channel).await;
        tolerate(result, "already_archived").map_err(StepError::from)?;
        Ok(StepOutcome::done())
    }
}

/// Creates a channel and outputs its id.
pub struct CreateChannel {
    chat: Arc<dyn ChatClient>,
    is_private: bool,
}

impl CreateChannel {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatClient>, is_private: bool) -> Self {
        Self { chat, is_private }
    }

    #[must_use]
    pub fn spec(is_private: bool) -> StepSpec {
        let name = if is_private {
            "Create a private channel"
        } else {
            "Create a public channel"
        };
        StepSpec::new(name, CATEGORY)
            .input("name", IoSpec::required("Channel name", DataType::Text))
            .output("id", IoSpec::required("Created channel", DataType::Channel))
    }
}

#[async_trait]
impl StepHandler for CreateChannel {
    async fn run(
        &self,
        ctx: &mut StepContext,
        inputs: StepInputs,
    ) -> Result<StepOutcome, Report<StepError>> {
        let name = require(&inputs, "name")?;
        let id = self
            .chat
            .create_channel(&ctx.access_token, name, self.is_private)
            .await
            .map_err(StepError::from)?;
        info!(channel = %id, is_private = self.is_private, "created channel");

        let mut outputs = StepOutputs::new();
        outputs.insert("id".to_string(), id);
        Ok(StepOutcome::Completed(outputs))
    }
}
