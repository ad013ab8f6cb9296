//! Inbound events the dispatcher matches against triggers.
//!
//! Events arrive already verified; the transport that received them is not
//! this crate's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tidewater_workflow::trigger::{TriggerType, reaction_key};

/// An external event or scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A message was posted.
    Message {
        channel: String,
        user: String,
        ts: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtype: Option<String>,
    },
    /// A reaction was added to a message.
    ReactionAdded {
        channel: String,
        ts: String,
        user: String,
        reaction: String,
    },
    /// A user joined a channel.
    MemberJoined { channel: String, user: String },
    /// A modal opened by a step was submitted.
    ViewSubmission {
        /// The id the step stored in the modal's private state.
        modal_id: String,
        user: String,
        /// Interaction id of the submission, usable to open a further modal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interaction_id: Option<String>,
        /// Answer per input block id.
        #[serde(default)]
        values: BTreeMap<String, String>,
    },
    /// The scheduler fired due triggers.
    ScheduleTick { fired_at: DateTime<Utc> },
}

impl InboundEvent {
    /// The trigger type and correlation key this event matches, if any.
    ///
    /// Schedule ticks are matched by the scheduler itself and return `None`.
    #[must_use]
    pub fn correlation(&self) -> Option<(TriggerType, String)> {
        match self {
            Self::Message { channel, .. } => Some((TriggerType::Message, channel.clone())),
            Self::ReactionAdded {
                channel, reaction, ..
            } => Some((TriggerType::Reaction, reaction_key(channel, reaction))),
            Self::MemberJoined { channel, .. } => {
                Some((TriggerType::MemberJoin, channel.clone()))
            }
            Self::ViewSubmission { modal_id, .. } => {
                Some((TriggerType::Modal, modal_id.clone()))
            }
            Self::ScheduleTick { .. } => None,
        }
    }

    /// The user who caused the event.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::Message { user, .. }
            | Self::ReactionAdded { user, .. }
            | Self::MemberJoined { user, .. }
            | Self::ViewSubmission { user, .. } => Some(user),
            Self::ScheduleTick { .. } => None,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::ReactionAdded { .. } => "reaction_added",
            Self::MemberJoined { .. } => "member_joined",
            Self::ViewSubmission { .. } => "view_submission",
            Self::ScheduleTick { .. } => "schedule_tick",
        }
    }
}
