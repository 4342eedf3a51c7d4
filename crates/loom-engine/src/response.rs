//! Classification of raw model replies.
//!
//! Models are asked for a single JSON object but often wrap it in prose or
//! code fences. The object is taken from the first `{` to the last `}`; if
//! that span does not parse, a brace-matching scan from the first `{` is
//! tried. Anything else becomes a [`ProtocolError`] with a fallback reply
//! that hands control back to the human.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

const CONTRACT_FIELDS: &[&str] = &[
    "user_message",
    "ask_human",
    "task_finished",
    "tool_name",
    "kwargs",
    "transfer_to_task",
    "agent_name",
    "task_description",
];

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub user_message: String,
    #[serde(default, deserialize_with = "flag")]
    pub ask_human: bool,
    #[serde(default, deserialize_with = "flag")]
    pub task_finished: bool,
    #[serde(default, deserialize_with = "non_empty")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub kwargs: Option<Value>,
    #[serde(default, deserialize_with = "non_empty")]
    pub transfer_to_task: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub agent_name: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub task_description: Option<String>,
}

/// Accepts `true`/`false` as booleans or strings; `null` is false.
fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match Value::deserialize(d)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(s.trim().eq_ignore_ascii_case("true")),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!("expected a boolean, got {other}"))),
    }
}

fn non_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// What the orchestrator does with a reply, in priority order.
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    ToolCall { name: String, kwargs: Value },
    Delegate {
        task_name: String,
        agent_name: Option<String>,
        description: Option<String>,
    },
    Finish,
    AskHuman,
    Continue,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("reply contains no JSON object")]
    NoObject,
    #[error("reply is not valid JSON: {0}")]
    NotJson(String),
    #[error("reply object has none of the contract fields")]
    MissingFields,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedReply {
    pub reply: AgentReply,
    pub directive: Directive,
    /// Set when the fallback reply was used.
    pub protocol_error: Option<ProtocolError>,
}

impl AgentReply {
    pub fn directive(&self) -> Directive {
        if let Some(name) = &self.tool_name {
            return Directive::ToolCall {
                name: name.clone(),
                kwargs: self
                    .kwargs
                    .clone()
                    .filter(|v| !v.is_null())
                    .unwrap_or_else(|| Value::Object(Default::default())),
            };
        }
        if let Some(task_name) = &self.transfer_to_task {
            return Directive::Delegate {
                task_name: task_name.clone(),
                agent_name: self.agent_name.clone(),
                description: self.task_description.clone(),
            };
        }
        if self.task_finished {
            Directive::Finish
        } else if self.ask_human {
            Directive::AskHuman
        } else {
            Directive::Continue
        }
    }
}

/// Parse and classify a raw reply. Never fails.
pub fn parse_reply(raw: &str) -> ParsedReply {
    match parse_strict(raw) {
        Ok(reply) => {
            let directive = reply.directive();
            ParsedReply {
                reply,
                directive,
                protocol_error: None,
            }
        }
        Err(e) => ParsedReply {
            reply: AgentReply {
                user_message: raw.trim().to_string(),
                ask_human: true,
                ..AgentReply::default()
            },
            directive: Directive::AskHuman,
            protocol_error: Some(e),
        },
    }
}

fn parse_strict(raw: &str) -> Result<AgentReply, ProtocolError> {
    let object = extract_json_object(raw)?;
    if !CONTRACT_FIELDS.iter().any(|f| object.contains_key(*f)) {
        return Err(ProtocolError::MissingFields);
    }
    serde_json::from_value(Value::Object(object)).map_err(|e| ProtocolError::NotJson(e.to_string()))
}

/// Locate and parse the JSON object embedded in `raw`.
pub fn extract_json_object(raw: &str) -> Result<serde_json::Map<String, Value>, ProtocolError> {
    let start = raw.find('{').ok_or(ProtocolError::NoObject)?;
    let end = raw.rfind('}').ok_or(ProtocolError::NoObject)?;

    let wide_error = if end > start {
        match serde_json::from_str::<Value>(&raw[start..=end]) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(_) => "not an object".to_string(),
            Err(e) => e.to_string(),
        }
    } else {
        "unbalanced braces".to_string()
    };

    let Some(span) = balanced_span(&raw[start..]) else {
        return Err(ProtocolError::NotJson(wide_error));
    };
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ProtocolError::NoObject),
        Err(e) => Err(ProtocolError::NotJson(e.to_string())),
    }
}

/// The prefix of `s` (which starts with `{`) up to its matching `}`,
/// skipping braces inside string literals.
fn balanced_span(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
