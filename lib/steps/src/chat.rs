//! The chat platform client the built-in steps call.
//!
//! The worker provides a Web API implementation. Calls return the
//! platform's error code so handlers can treat "already done" responses as
//! success.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use tidewater_workflow::StepError;
use tracing::debug;

/// A posted message, as stored in `message` typed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: String,
    pub ts: String,
}

impl MessageRef {
    /// Parses a `message` typed value.
    ///
    /// # Errors
    ///
    /// Returns `StepError::InvalidInput` if the value is not `{channel, ts}`.
    pub fn parse(input: &str, raw: &str) -> Result<Self, StepError> {
        serde_json::from_str(raw).map_err(|e| StepError::InvalidInput {
            input: input.to_string(),
            reason: format!("expected a message reference: {e}"),
        })
    }

    /// Encodes the reference as a `message` typed value.
    #[must_use]
    pub fn to_value(&self) -> String {
        serde_json::json!({ "channel": self.channel, "ts": self.ts }).to_string()
    }
}

/// Errors from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The platform answered with an error code.
    Api { method: &'static str, code: String },
    /// The request did not complete.
    Transport { method: &'static str, message: String },
}

impl ChatError {
    /// The platform error code, if the platform answered.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            Self::Transport { .. } => None,
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api { method, code } => write!(f, "{method} failed: {code}"),
            Self::Transport { method, message } => {
                write!(f, "{method} request failed: {message}")
            }
        }
    }
}

impl std::error::Error for ChatError {}

impl From<ChatError> for StepError {
    fn from(err: ChatError) -> Self {
        Self::External {
            service: "chat".to_string(),
            message: err.to_string(),
        }
    }
}

/// Treats the given error code as success.
pub(crate) fn tolerate(result: Result<(), ChatError>, code: &str) -> Result<(), ChatError> {
    match result {
        Err(e) if e.code() == Some(code) => {
            debug!(code, "treating conflict response as success");
            Ok(())
        }
        other => other,
    }
}

/// Chat platform operations used by steps.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Posts blocks to a channel or user. Returns the posted message.
    async fn post_message(
        &self,
        token: &str,
        channel: &str,
        blocks: Vec<JsonValue>,
    ) -> Result<MessageRef, ChatError>;

    /// Posts blocks visible only to `user`.
    async fn post_ephemeral(
        &self,
        token: &str,
        channel: &str,
        user: &str,
        blocks: Vec<JsonValue>,
    ) -> Result<(), ChatError>;

    /// Adds a reaction to a message.
    async fn add_reaction(
        &self,
        token: &str,
        message: &MessageRef,
        name: &str,
    ) -> Result<(), ChatError>;

    /// Removes a reaction from a message.
    async fn remove_reaction(
        &self,
        token: &str,
        message: &MessageRef,
        name: &str,
    ) -> Result<(), ChatError>;

    /// Invites a user to a channel.
    async fn invite_to_channel(&self, token: &str, channel: &str, user: &str)
    -> Result<(), ChatError>;

    /// Archives a channel.
    async fn archive_channel(&self, token: &str, channel: &str) -> Result<(), ChatError>;

    /// Creates a channel. Returns its id.
    async fn create_channel(
        &self,
        token: &str,
        name: &str,
        is_private: bool,
    ) -> Result<String, ChatError>;

    /// Opens a modal view using an interaction id.
    async fn open_view(
        &self,
        token: &str,
        interaction_id: &str,
        view: JsonValue,
    ) -> Result<(), ChatError>;
}
