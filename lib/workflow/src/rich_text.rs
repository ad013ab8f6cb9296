//! Structural substitution inside rich text blocks.
//!
//! A rich text block is a list of containers. Sections, quotes and
//! preformatted blocks hold inline elements directly; lists hold further
//! containers. Substitution rebuilds each leaf container's inline sequence:
//! a token occurrence inside a text run is replaced by a native user or
//! channel element when the value is a mention, and by styled literal text
//! otherwise. Adjacent text runs with identical style are merged afterwards
//! so the tree stays canonical.

use crate::template::Replacements;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::LazyLock;

static USER_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<@([UW][A-Z0-9]+)(?:\|[^>]*)?>$").expect("static regex")
});

static CHANNEL_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<#([CGD][A-Z0-9]+)(?:\|[^>]*)?>$").expect("static regex")
});

/// Fields carried through without interpretation.
pub type Extra = Map<String, JsonValue>;

fn rich_text_kind() -> String {
    "rich_text".to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Text style flags. Absent flags are false; flags this model does not
/// name (such as `highlight`) are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStyle {
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub strike: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub underline: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub code: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

impl TextStyle {
    /// Whether no flag is set.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        *self == Self::default()
    }
}

/// An inline element inside a leaf container.
///
/// Only the elements substitution produces or rewrites are modelled. Every
/// other element (emoji, links, dates, broadcasts, and kinds added later)
/// is held as raw JSON and written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inline {
    /// A run of literal text.
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "TextStyle::is_plain")]
        style: TextStyle,
        #[serde(flatten)]
        extra: Extra,
    },
    /// A native user mention.
    User {
        user_id: String,
        #[serde(default, skip_serializing_if = "TextStyle::is_plain")]
        style: TextStyle,
        #[serde(flatten)]
        extra: Extra,
    },
    /// A native channel mention.
    Channel {
        channel_id: String,
        #[serde(default, skip_serializing_if = "TextStyle::is_plain")]
        style: TextStyle,
        #[serde(flatten)]
        extra: Extra,
    },
    #[serde(untagged)]
    Other(JsonValue),
}

impl Inline {
    /// A literal text run.
    #[must_use]
    pub fn text(text: impl Into<String>, style: TextStyle) -> Self {
        Self::Text {
            text: text.into(),
            style,
            extra: Extra::new(),
        }
    }
}

/// A container inside a rich text block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RichTextElement {
    /// A paragraph of inline elements.
    RichTextSection {
        elements: Vec<Inline>,
        #[serde(flatten)]
        extra: Extra,
    },
    /// A bulleted or ordered list of containers.
    RichTextList {
        style: String,
        elements: Vec<RichTextElement>,
        #[serde(flatten)]
        extra: Extra,
    },
    /// A block quote.
    RichTextQuote {
        elements: Vec<Inline>,
        #[serde(flatten)]
        extra: Extra,
    },
    /// A preformatted block.
    RichTextPreformatted {
        elements: Vec<Inline>,
        #[serde(flatten)]
        extra: Extra,
    },
    #[serde(untagged)]
    Other(JsonValue),
}

/// A rich text block as produced by the chat platform's rich text input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichTextBlock {
    #[serde(rename = "type", default = "rich_text_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    pub elements: Vec<RichTextElement>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl RichTextBlock {
    /// A block with a single section.
    #[must_use]
    pub fn section(elements: Vec<Inline>) -> Self {
        Self {
            kind: rich_text_kind(),
            block_id: None,
            elements: vec![RichTextElement::RichTextSection {
                elements,
                extra: Extra::new(),
            }],
            extra: Extra::new(),
        }
    }
}

/// A mention recognised in a replacement value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mention {
    User(String),
    Channel(String),
}

impl Mention {
    /// Recognises `<@U…>` and `<#C…>` (optionally with a `|label`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if let Some(caps) = USER_MENTION.captures(value) {
            return Some(Self::User(caps[1].to_string()));
        }
        CHANNEL_MENTION
            .captures(value)
            .map(|caps| Self::Channel(caps[1].to_string()))
    }

    fn to_inline(&self, style: TextStyle) -> Inline {
        match self {
            Self::User(user_id) => Inline::User {
                user_id: user_id.clone(),
                style,
                extra: Extra::new(),
            },
            Self::Channel(channel_id) => Inline::Channel {
                channel_id: channel_id.clone(),
                style,
                extra: Extra::new(),
            },
        }
    }
}

/// Substitutes tokens throughout a block.
///
/// With an empty replacement map this only normalises the block.
#[must_use]
pub fn replace_rich_text(block: &RichTextBlock, replacements: &Replacements) -> RichTextBlock {
    RichTextBlock {
        kind: block.kind.clone(),
        block_id: block.block_id.clone(),
        elements: block
            .elements
            .iter()
            .map(|element| replace_element(element, replacements))
            .collect(),
        extra: block.extra.clone(),
    }
}

/// Merges adjacent same-style text runs throughout a block.
#[must_use]
pub fn normalize(block: &RichTextBlock) -> RichTextBlock {
    replace_rich_text(block, &Replacements::new())
}

fn replace_element(element: &RichTextElement, replacements: &Replacements) -> RichTextElement {
    match element {
        RichTextElement::RichTextSection { elements, extra } => RichTextElement::RichTextSection {
            elements: replace_inlines(elements, replacements),
            extra: extra.clone(),
        },
        RichTextElement::RichTextQuote { elements, extra } => RichTextElement::RichTextQuote {
            elements: replace_inlines(elements, replacements),
            extra: extra.clone(),
        },
        RichTextElement::RichTextPreformatted { elements, extra } => {
            RichTextElement::RichTextPreformatted {
                elements: replace_inlines(elements, replacements),
                extra: extra.clone(),
            }
        }
        RichTextElement::RichTextList {
            style,
            elements,
            extra,
        } => RichTextElement::RichTextList {
            style: style.clone(),
            elements: elements
                .iter()
                .map(|child| replace_element(child, replacements))
                .collect(),
            extra: extra.clone(),
        },
        RichTextElement::Other(raw) => RichTextElement::Other(raw.clone()),
    }
}

fn replace_inlines(elements: &[Inline], replacements: &Replacements) -> Vec<Inline> {
    // Merge first so a token split across same-style runs is seen whole.
    let mut current = merge_text_runs(elements.to_vec());
    for (token, value) in replacements.iter() {
        let mention = Mention::parse(value);
        current = splice_token(current, token, value, mention.as_ref());
    }
    merge_text_runs(current)
}

fn splice_token(
    elements: Vec<Inline>,
    token: &str,
    value: &str,
    mention: Option<&Mention>,
) -> Vec<Inline> {
    let mut spliced = Vec::with_capacity(elements.len());
    for element in elements {
        match element {
            Inline::Text { text, style, extra } if text.contains(token) => {
                let run = |piece: &str| Inline::Text {
                    text: piece.to_string(),
                    style: style.clone(),
                    extra: extra.clone(),
                };
                let mut pieces = text.split(token);
                if let Some(first) = pieces.next().filter(|s| !s.is_empty()) {
                    spliced.push(run(first));
                }
                for piece in pieces {
                    spliced.push(match mention {
                        Some(m) => m.to_inline(style.clone()),
                        None => run(value),
                    });
                    if !piece.is_empty() {
                        spliced.push(run(piece));
                    }
                }
            }
            other => spliced.push(other),
        }
    }
    spliced
}

fn merge_text_runs(elements: Vec<Inline>) -> Vec<Inline> {
    let mut merged: Vec<Inline> = Vec::with_capacity(elements.len());
    for element in elements {
        if let (
            Some(Inline::Text {
                text: previous,
                style: previous_style,
                extra: previous_extra,
            }),
            Inline::Text { text, style, extra },
        ) = (merged.last_mut(), &element)
        {
            if previous_style == style && previous_extra == extra {
                previous.push_str(text);
                continue;
            }
        }
        merged.push(element);
    }
    merged
}
