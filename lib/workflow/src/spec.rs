//! Step specifications: the declared inputs and outputs of a step type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The value type of a step input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// A chat-platform user id.
    User,
    /// A chat-platform channel id.
    Channel,
    /// Plain text.
    Text,
    /// A JSON-encoded rich text block.
    RichText,
    /// A JSON-encoded `{channel, ts}` message reference.
    Message,
}

impl DataType {
    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Channel => "channel",
            Self::Text => "text",
            Self::RichText => "rich_text",
            Self::Message => "message",
        }
    }

    /// Whether values of this type need structural substitution.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::RichText)
    }
}

/// Declaration of one input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSpec {
    /// Display name.
    pub name: String,
    /// Value type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Whether a value must be supplied.
    pub required: bool,
    /// Optional help text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IoSpec {
    /// A required value.
    #[must_use]
    pub fn required(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: true,
            description: None,
        }
    }

    /// An optional value.
    #[must_use]
    pub fn optional(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            required: false,
            ..Self::required(name, data_type)
        }
    }

    /// Adds help text.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The catalogue entry describing a step type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Display name.
    pub name: String,
    /// Grouping shown in the step picker.
    pub category: String,
    /// Declared inputs by key.
    pub inputs: BTreeMap<String, IoSpec>,
    /// Declared outputs by key.
    pub outputs: BTreeMap<String, IoSpec>,
    /// Whether the step produces outputs that depend on its configuration
    /// and cannot all be declared up front.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dynamic_outputs: bool,
}

impl StepSpec {
    /// Creates a spec with no inputs or outputs.
    #[must_use]
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            dynamic_outputs: false,
        }
    }

    /// Declares an input.
    #[must_use]
    pub fn input(mut self, key: impl Into<String>, spec: IoSpec) -> Self {
        self.inputs.insert(key.into(), spec);
        self
    }

    /// Declares an output.
    #[must_use]
    pub fn output(mut self, key: impl Into<String>, spec: IoSpec) -> Self {
        self.outputs.insert(key.into(), spec);
        self
    }

    /// Marks the outputs as configuration-dependent.
    #[must_use]
    pub fn with_dynamic_outputs(mut self) -> Self {
        self.dynamic_outputs = true;
        self
    }

    /// Whether references to `key` can resolve.
    #[must_use]
    pub fn produces(&self, key: &str) -> bool {
        self.dynamic_outputs || self.outputs.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rich_text_is_structural() {
        assert!(DataType::RichText.is_structural());
        assert!(!DataType::Text.is_structural());
        assert!(!DataType::User.is_structural());
    }

    #[test]
    fn io_spec_serializes_type_field() {
        let spec = IoSpec::required("Channel", DataType::Channel);
        let json = serde_json::to_value(&spec).expect("serialize");
        assert_eq!(json["type"], "channel");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn builder_collects_inputs_and_outputs() {
        let spec = StepSpec::new("Create a public channel", "Channels")
            .input("name", IoSpec::required("Name", DataType::Text))
            .output("id", IoSpec::required("Channel", DataType::Channel));

        assert_eq!(spec.inputs.len(), 1);
        assert_eq!(spec.outputs["id"].data_type, DataType::Channel);
        assert!(spec.produces("id"));
        assert!(!spec.produces("name"));
    }

    #[test]
    fn dynamic_outputs_produce_any_key() {
        let spec = StepSpec::new("Collect a form", "Forms").with_dynamic_outputs();
        assert!(spec.produces("0"));
        let json = serde_json::to_value(&spec).expect("serialize");
        assert_eq!(json["dynamic_outputs"], true);
    }
}
