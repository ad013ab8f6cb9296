//! Web API implementation of [`ChatClient`].
//!
//! Every method is a JSON POST to `{api_base}/{method}` with the workflow's
//! bot token. The API reports failures in the body as `{"ok": false,
//! "error": "<code>"}`, which become `ChatError::Api` with that code.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use tidewater_steps::{ChatClient, ChatError, MessageRef};
use tracing::debug;

/// Body shape shared by every Web API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    fields: Map<String, JsonValue>,
}

impl ApiResponse {
    fn into_result(self, method: &'static str) -> Result<Map<String, JsonValue>, ChatError> {
        if self.ok {
            Ok(self.fields)
        } else {
            Err(ChatError::Api {
                method,
                code: self.error.unwrap_or_else(|| "unknown_error".to_string()),
            })
        }
    }
}

fn missing_field(method: &'static str, field: &str) -> ChatError {
    ChatError::Transport {
        method,
        message: format!("response has no '{field}'"),
    }
}

/// Chat client over the Web API.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
}

impl SlackClient {
    /// Creates a client for the API at `api_base`.
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call(
        &self,
        method: &'static str,
        token: &str,
        body: JsonValue,
    ) -> Result<Map<String, JsonValue>, ChatError> {
        let transport = |e: reqwest::Error| ChatError::Transport {
            method,
            message: e.to_string(),
        };
        let response: ApiResponse = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;
        debug!(method, ok = response.ok, "chat api call");
        response.into_result(method)
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn post_message(
        &self,
        token: &str,
        channel: &str,
        blocks: Vec<JsonValue>,
    ) -> Result<MessageRef, ChatError> {
        const METHOD: &str = "chat.postMessage";
        let fields = self
            .call(METHOD, token, json!({ "channel": channel, "blocks": blocks }))
            .await?;
        let field = |name: &str| {
            fields
                .get(name)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| missing_field(METHOD, name))
        };
        Ok(MessageRef {
            channel: field("channel")?,
            ts: field("ts")?,
        })
    }

    async fn post_ephemeral(
        &self,
        token: &str,
        channel: &str,
        user: &str,
        blocks: Vec<JsonValue>,
    ) -> Result<(), ChatError> {
        self.call(
            "chat.postEphemeral",
            token,
            json!({ "channel": channel, "user": user, "blocks": blocks }),
        )
        .await?;
        Ok(())
    }

    async fn add_reaction(
        &self,
        token: &str,
        message: &MessageRef,
        name: &str,
    ) -> Result<(), ChatError> {
        self.call(
            "reactions.add",
            token,
            json!({ "channel": message.channel, "timestamp": message.ts, "name": name }),
        )
        .await?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        token: &str,
        message: &MessageRef,
        name: &str,
    ) -> Result<(), ChatError> {
        self.call(
            "reactions.remove",
            token,
            json!({ "channel": message.channel, "timestamp": message.ts, "name": name }),
        )
        .await?;
        Ok(())
    }

    async fn invite_to_channel(
        &self,
        token: &str,
        channel: &str,
        user: &str,
    ) -> Result<(), ChatError> {
        self.call(
            "conversations.invite",
            token,
            json!({ "channel": channel, "users": user }),
        )
        .await?;
        Ok(())
    }

    async fn archive_channel(&self, token: &str, channel: &str) -> Result<(), ChatError> {
        self.call("conversations.archive", token, json!({ "channel": channel }))
            .await?;
        Ok(())
    }

    async fn create_channel(
        &self,
        token: &str,
        name: &str,
        is_private: bool,
    ) -> Result<String, ChatError> {
        const METHOD: &str = "conversations.create";
        let fields = self
            .call(METHOD, token, json!({ "name": name, "is_private": is_private }))
            .await?;
        fields
            .get("channel")
            .and_then(|channel| channel.get("id"))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| missing_field(METHOD, "channel.id"))
    }

    async fn open_view(
        &self,
        token: &str,
        interaction_id: &str,
        view: JsonValue,
    ) -> Result<(), ChatError> {
        self.call(
            "views.open",
            token,
            json!({ "trigger_id": interaction_id, "view": view }),
        )
        .await?;
        Ok(())
    }
}
