//! Token substitution for step inputs.
//!
//! Tokens have the wire form `$!{…}`:
//!
//! - `$!{ctx.trigger_user_id}` and `$!{ctx.trigger_user_ping}` resolve from
//!   the execution's fixed context
//! - `$!{outputs.<stepId>.<key>}` resolves from accumulated step outputs;
//!   values seeded at start live under the `trigger` step namespace
//!
//! Substitution is flat: there is no expression language, and a token with
//! no value is left in place verbatim.

use crate::execution::ExecutionState;
use crate::rich_text::{self, RichTextBlock};
use crate::spec::DataType;

/// Opening delimiter of a token.
pub const TOKEN_OPEN: &str = "$!{";
/// Closing delimiter of a token.
pub const TOKEN_CLOSE: &str = "}";
/// Reserved output namespace for values seeded when an execution starts.
pub const TRIGGER_NAMESPACE: &str = "trigger";

/// A recognised token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// The triggering user's id.
    TriggerUserId,
    /// A mention of the triggering user.
    TriggerUserPing,
    /// An output, keyed `stepId.outputKey`.
    Output(String),
}

impl Token {
    /// Returns the wire form.
    #[must_use]
    pub fn wire(&self) -> String {
        match self {
            Self::TriggerUserId => format!("{TOKEN_OPEN}ctx.trigger_user_id{TOKEN_CLOSE}"),
            Self::TriggerUserPing => format!("{TOKEN_OPEN}ctx.trigger_user_ping{TOKEN_CLOSE}"),
            Self::Output(key) => format!("{TOKEN_OPEN}outputs.{key}{TOKEN_CLOSE}"),
        }
    }

    /// Parses the inside of a `$!{…}` token.
    #[must_use]
    pub fn parse_body(body: &str) -> Option<Self> {
        match body {
            "ctx.trigger_user_id" => Some(Self::TriggerUserId),
            "ctx.trigger_user_ping" => Some(Self::TriggerUserPing),
            _ => body
                .strip_prefix("outputs.")
                .filter(|key| key.contains('.'))
                .map(|key| Self::Output(key.to_string())),
        }
    }

    /// For output tokens, the step id segment (`trigger` for seeded values).
    #[must_use]
    pub fn output_step(&self) -> Option<&str> {
        match self {
            Self::Output(key) => key.split('.').next(),
            _ => None,
        }
    }
}

/// Every `$!{…}` occurrence in `input`, in order, with its parsed token.
///
/// Unrecognised bodies are returned with `None`.
#[must_use]
pub fn scan_tokens(input: &str) -> Vec<(String, Option<Token>)> {
    let mut found = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find(TOKEN_OPEN) {
        let after = &rest[start + TOKEN_OPEN.len()..];
        let Some(end) = after.find(TOKEN_CLOSE) else {
            break;
        };
        let body = &after[..end];
        found.push((
            format!("{TOKEN_OPEN}{body}{TOKEN_CLOSE}"),
            Token::parse_body(body),
        ));
        rest = &after[end + TOKEN_CLOSE.len()..];
    }
    found
}

/// Builds the output key for a value seeded at start.
#[must_use]
pub fn trigger_output_key(key: &str) -> String {
    format!("{TRIGGER_NAMESPACE}.{key}")
}

/// Formats a user mention in the chat platform's wire syntax.
#[must_use]
pub fn user_ping(user_id: &str) -> String {
    format!("<@{user_id}>")
}

/// An insertion-ordered map of token wire form to replacement value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacements {
    entries: Vec<(String, String)>,
}

impl Replacements {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map for an execution: context tokens first, then outputs.
    #[must_use]
    pub fn for_state(state: &ExecutionState) -> Self {
        let mut replacements = Self::new();
        replacements.insert(&Token::TriggerUserId, state.trigger_user_id.clone());
        replacements.insert(&Token::TriggerUserPing, user_ping(&state.trigger_user_id));
        for (key, value) in &state.outputs {
            replacements.insert(&Token::Output(key.clone()), value.clone());
        }
        replacements
    }

    /// Sets the value for a token, replacing any previous value.
    pub fn insert(&mut self, token: &Token, value: impl Into<String>) {
        let wire = token.wire();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == wire) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((wire, value)),
        }
    }

    /// Returns the value for a wire-form token.
    #[must_use]
    pub fn get(&self, wire: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == wire)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates `(wire form, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Replaces every literal occurrence of each token, one token at a time.
#[must_use]
pub fn replace_text(input: &str, replacements: &Replacements) -> String {
    let mut output = input.to_string();
    for (token, value) in replacements.iter() {
        if output.contains(token) {
            output = output.replace(token, value);
        }
    }
    output
}

/// Substitutes a raw input value according to its declared type.
///
/// Rich text is parsed, substituted structurally and re-encoded; an empty
/// rich text value stays empty.
///
/// # Errors
///
/// Returns the parse error when a rich text value is not valid rich text.
pub fn substitute_input(
    data_type: DataType,
    raw: &str,
    replacements: &Replacements,
) -> Result<String, serde_json::Error> {
    if !data_type.is_structural() {
        return Ok(replace_text(raw, replacements));
    }
    if raw.is_empty() {
        return Ok(String::new());
    }
    let block: RichTextBlock = serde_json::from_str(raw)?;
    serde_json::to_string(&rich_text::replace_rich_text(&block, replacements))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ExecutionState {
        let mut state = ExecutionState::new("U42");
        state
            .outputs
            .insert("abc.ts".to_string(), "1700000000.000100".to_string());
        state
    }

    #[test]
    fn wire_forms() {
        assert_eq!(Token::TriggerUserId.wire(), "$!{ctx.trigger_user_id}");
        assert_eq!(
            Token::Output("abc.ts".to_string()).wire(),
            "$!{outputs.abc.ts}"
        );
    }

    #[test]
    fn parse_body_rejects_bare_output_namespace() {
        assert_eq!(Token::parse_body("outputs.abc"), None);
        assert_eq!(Token::parse_body("ctx.nope"), None);
        assert_eq!(
            Token::parse_body("outputs.trigger.user"),
            Some(Token::Output("trigger.user".to_string()))
        );
    }

    #[test]
    fn scan_finds_tokens_in_order() {
        let found = scan_tokens("hi $!{ctx.trigger_user_ping}, see $!{outputs.a.b} $!{what}");
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].1, Some(Token::TriggerUserPing));
        assert_eq!(found[1].1, Some(Token::Output("a.b".to_string())));
        assert_eq!(found[2].0, "$!{what}");
        assert_eq!(found[2].1, None);
    }

    #[test]
    fn for_state_includes_context_and_outputs() {
        let replacements = Replacements::for_state(&state());
        assert_eq!(replacements.get("$!{ctx.trigger_user_id}"), Some("U42"));
        assert_eq!(replacements.get("$!{ctx.trigger_user_ping}"), Some("<@U42>"));
        assert_eq!(
            replacements.get("$!{outputs.abc.ts}"),
            Some("1700000000.000100")
        );
        assert_eq!(replacements.len(), 3);
    }

    #[test]
    fn insert_overwrites_existing_token() {
        let mut replacements = Replacements::new();
        replacements.insert(&Token::TriggerUserId, "U1");
        replacements.insert(&Token::TriggerUserId, "U2");
        assert_eq!(replacements.len(), 1);
        assert_eq!(replacements.get("$!{ctx.trigger_user_id}"), Some("U2"));
    }

    #[test]
    fn replace_text_substitutes_every_occurrence() {
        let replacements = Replacements::for_state(&state());
        let out = replace_text(
            "$!{ctx.trigger_user_id} and $!{ctx.trigger_user_id} at $!{outputs.abc.ts}",
            &replacements,
        );
        assert_eq!(out, "U42 and U42 at 1700000000.000100");
    }

    #[test]
    fn replace_text_without_tokens_is_identity() {
        let replacements = Replacements::for_state(&state());
        let input = "nothing to see { here } $!{not closed";
        assert_eq!(replace_text(input, &replacements), input);
    }

    #[test]
    fn unresolved_tokens_are_left_verbatim() {
        let replacements = Replacements::for_state(&state());
        assert_eq!(
            replace_text("$!{outputs.gone.ts}", &replacements),
            "$!{outputs.gone.ts}"
        );
    }

    #[test]
    fn substitute_rich_text_input_round_trips_json() {
        let raw = r#"{"type":"rich_text","elements":[{"type":"rich_text_section","elements":[{"type":"text","text":"hey $!{ctx.trigger_user_ping}!"}]}]}"#;
        let out = substitute_input(DataType::RichText, raw, &Replacements::for_state(&state()))
            .expect("substitute");
        let value: serde_json::Value = serde_json::from_str(&out).expect("json");
        let elements = &value["elements"][0]["elements"];
        assert_eq!(elements[0]["text"], "hey ");
        assert_eq!(elements[1]["type"], "user");
        assert_eq!(elements[1]["user_id"], "U42");
        assert_eq!(elements[2]["text"], "!");
    }

    #[test]
    fn substitute_empty_rich_text_stays_empty() {
        let out = substitute_input(DataType::RichText, "", &Replacements::new()).expect("ok");
        assert_eq!(out, "");
    }

    #[test]
    fn substitute_malformed_rich_text_fails() {
        assert!(substitute_input(DataType::RichText, "{not json", &Replacements::new()).is_err());
    }

    #[test]
    fn trigger_namespace_keys() {
        assert_eq!(trigger_output_key("user_ping"), "trigger.user_ping");
        let token = Token::Output(trigger_output_key("message"));
        assert_eq!(token.output_step(), Some(TRIGGER_NAMESPACE));
    }
}
