//! Trigger types binding external events to functions.
//!
//! A trigger pairs a correlation (what to match) with a target (a workflow to
//! start or an execution to resume) and the name of the function to call when
//! it fires. Recurring triggers start workflows and persist until deleted;
//! one-shot triggers resume a suspended execution and are deleted on firing.

use crate::error::TriggerError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tidewater_core::{ExecutionId, TriggerId, WorkflowId};

/// Separator of the composite reaction key.
pub const REACTION_KEY_SEPARATOR: char = '|';

/// The type of trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Recurring schedule.
    Cron,
    /// A message posted in a channel.
    Message,
    /// A reaction added in a channel.
    Reaction,
    /// A user joining a channel.
    MemberJoin,
    /// A single point in time.
    Time,
    /// A submitted modal.
    Modal,
}

impl TriggerType {
    /// Returns the stored name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::Message => "message",
            Self::Reaction => "reaction",
            Self::MemberJoin => "member_join",
            Self::Time => "time",
            Self::Modal => "modal",
        }
    }

    /// Parses a stored name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cron" => Some(Self::Cron),
            "message" => Some(Self::Message),
            "reaction" => Some(Self::Reaction),
            "member_join" => Some(Self::MemberJoin),
            "time" => Some(Self::Time),
            "modal" => Some(Self::Modal),
            _ => None,
        }
    }

    /// The lifetime every trigger of this type has.
    #[must_use]
    pub fn lifetime(&self) -> TriggerLifetime {
        match self {
            Self::Cron | Self::Message | Self::Reaction | Self::MemberJoin => {
                TriggerLifetime::Recurring
            }
            Self::Time | Self::Modal => TriggerLifetime::OneShot,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a trigger survives firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerLifetime {
    /// Persists until explicitly deleted.
    Recurring,
    /// Deleted once fired.
    OneShot,
}

impl TriggerLifetime {
    /// Returns the stored name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recurring => "recurring",
            Self::OneShot => "one_shot",
        }
    }

    /// Parses a stored name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recurring" => Some(Self::Recurring),
            "one_shot" => Some(Self::OneShot),
            _ => None,
        }
    }
}

/// The fields an inbound event must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Correlation {
    /// Cron expression, evaluated by the scheduler.
    Cron { schedule: String },
    /// Channel id.
    Message { channel: String },
    /// Channel id and emoji name.
    Reaction { channel: String, emoji: String },
    /// Channel id.
    MemberJoin { channel: String },
    /// Absolute fire time.
    Time { fire_at: DateTime<Utc> },
    /// Opaque id carried in a modal's private state.
    Modal { id: String },
}

impl Correlation {
    /// The trigger type this correlation belongs to.
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Cron { .. } => TriggerType::Cron,
            Self::Message { .. } => TriggerType::Message,
            Self::Reaction { .. } => TriggerType::Reaction,
            Self::MemberJoin { .. } => TriggerType::MemberJoin,
            Self::Time { .. } => TriggerType::Time,
            Self::Modal { .. } => TriggerType::Modal,
        }
    }

    /// The flat key stored and matched by equality.
    ///
    /// Reactions use `channel|emoji`; times use epoch milliseconds.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Cron { schedule } => schedule.clone(),
            Self::Message { channel } | Self::MemberJoin { channel } => channel.clone(),
            Self::Reaction { channel, emoji } => reaction_key(channel, emoji),
            Self::Time { fire_at } => fire_at.timestamp_millis().to_string(),
            Self::Modal { id } => id.clone(),
        }
    }

    /// Rebuilds a correlation from its type and flat key.
    ///
    /// # Errors
    ///
    /// Returns `TriggerError::InvalidCorrelation` when the key does not fit
    /// the type's encoding.
    pub fn from_key(trigger_type: TriggerType, key: &str) -> Result<Self, TriggerError> {
        let correlation = match trigger_type {
            TriggerType::Cron => Self::Cron {
                schedule: key.to_string(),
            },
            TriggerType::Message => Self::Message {
                channel: key.to_string(),
            },
            TriggerType::MemberJoin => Self::MemberJoin {
                channel: key.to_string(),
            },
            TriggerType::Reaction => {
                let (channel, emoji) = key.split_once(REACTION_KEY_SEPARATOR).ok_or_else(|| {
                    TriggerError::InvalidCorrelation {
                        reason: format!("reaction key '{key}' has no separator"),
                    }
                })?;
                Self::Reaction {
                    channel: channel.to_string(),
                    emoji: emoji.to_string(),
                }
            }
            TriggerType::Time => {
                let millis: i64 = key.parse().map_err(|_| TriggerError::InvalidCorrelation {
                    reason: format!("time key '{key}' is not epoch milliseconds"),
                })?;
                let fire_at = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
                    TriggerError::InvalidCorrelation {
                        reason: format!("time key '{key}' is out of range"),
                    }
                })?;
                Self::Time { fire_at }
            }
            TriggerType::Modal => Self::Modal { id: key.to_string() },
        };
        Ok(correlation)
    }

    fn validate(&self) -> Result<(), TriggerError> {
        if let Self::Reaction { channel, emoji } = self {
            if channel.contains(REACTION_KEY_SEPARATOR) || emoji.contains(REACTION_KEY_SEPARATOR) {
                return Err(TriggerError::InvalidCorrelation {
                    reason: format!("reaction fields may not contain '{REACTION_KEY_SEPARATOR}'"),
                });
            }
        }
        Ok(())
    }
}

/// Builds the composite reaction key.
#[must_use]
pub fn reaction_key(channel: &str, emoji: &str) -> String {
    format!("{channel}{REACTION_KEY_SEPARATOR}{emoji}")
}

/// What a trigger acts on when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TriggerTarget {
    /// Start a new run of this workflow.
    Workflow(WorkflowId),
    /// Resume this suspended execution.
    Execution(ExecutionId),
}

/// A persisted trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique identifier.
    pub id: TriggerId,
    /// What to match.
    pub correlation: Correlation,
    /// What to act on.
    pub target: TriggerTarget,
    /// Name in the trigger function registry.
    pub function: String,
    /// Opaque data handed to the function.
    pub details: serde_json::Value,
    /// Whether the trigger is deleted after firing.
    pub lifetime: TriggerLifetime,
    /// When this trigger was created.
    pub created_at: DateTime<Utc>,
}

impl Trigger {
    /// Creates a trigger, checking that the target suits the type.
    ///
    /// # Errors
    ///
    /// Returns `TriggerError::TargetMismatch` when a recurring type targets an
    /// execution or a one-shot type targets a workflow, and
    /// `TriggerError::InvalidCorrelation` when the correlation cannot be
    /// encoded.
    pub fn new(
        correlation: Correlation,
        target: TriggerTarget,
        function: impl Into<String>,
        details: serde_json::Value,
    ) -> Result<Self, TriggerError> {
        let trigger_type = correlation.trigger_type();
        let lifetime = trigger_type.lifetime();
        let target_fits = matches!(
            (lifetime, target),
            (TriggerLifetime::Recurring, TriggerTarget::Workflow(_))
                | (TriggerLifetime::OneShot, TriggerTarget::Execution(_))
        );
        if !target_fits {
            return Err(TriggerError::TargetMismatch {
                trigger_type: trigger_type.to_string(),
            });
        }
        correlation.validate()?;

        Ok(Self {
            id: TriggerId::new(),
            correlation,
            target,
            function: function.into(),
            details,
            lifetime,
            created_at: Utc::now(),
        })
    }

    /// Returns the trigger type.
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        self.correlation.trigger_type()
    }

    /// The workflow to start, for recurring triggers.
    #[must_use]
    pub fn workflow_id(&self) -> Option<WorkflowId> {
        match self.target {
            TriggerTarget::Workflow(id) => Some(id),
            TriggerTarget::Execution(_) => None,
        }
    }

    /// The execution to resume, for one-shot triggers.
    #[must_use]
    pub fn execution_id(&self) -> Option<ExecutionId> {
        match self.target {
            TriggerTarget::Execution(id) => Some(id),
            TriggerTarget::Workflow(_) => None,
        }
    }

    /// Whether the trigger is deleted after firing.
    #[must_use]
    pub fn is_one_shot(&self) -> bool {
        self.lifetime == TriggerLifetime::OneShot
    }
}
