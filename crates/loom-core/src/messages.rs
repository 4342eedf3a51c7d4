use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author name used for messages typed by the person driving the session.
pub const HUMAN_AUTHOR: &str = "human";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One turn in an orchestration session, tagged with the task that wrote it
/// and the task whose conversation it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub role: Role,
    pub created_by: String,
    pub created_for: String,
    /// Advisory only. Ordering is the log's append order.
    pub ts: DateTime<Utc>,
}

impl Message {
    pub fn new(
        content: impl Into<String>,
        role: Role,
        created_by: impl Into<String>,
        created_for: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            role,
            created_by: created_by.into(),
            created_for: created_for.into(),
            ts: Utc::now(),
        }
    }

    pub fn is_human(&self) -> bool {
        self.created_by == HUMAN_AUTHOR
    }
}

/// A `{role, content}` pair as sent across the LLM boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for ChatMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role,
            content: m.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serde_is_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), r#""tool""#);
        let parsed: Role = serde_json::from_str(r#""assistant""#).unwrap();
        assert_eq!(parsed, Role::Assistant);
    }

    #[test]
    fn role_from_str() {
        assert_eq!("system".parse::<Role>().unwrap(), Role::System);
        assert!("robot".parse::<Role>().is_err());
    }

    #[test]
    fn message_record_shape() {
        let msg = Message::new("hi", Role::User, HUMAN_AUTHOR, "root");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "hi");
        assert_eq!(json["role"], "user");
        assert_eq!(json["created_by"], "human");
        assert_eq!(json["created_for"], "root");
        assert!(json["ts"].is_string());
        assert!(msg.is_human());
    }

    #[test]
    fn chat_message_drops_routing() {
        let msg = Message::new("result", Role::Tool, "t1", "t1");
        let chat = ChatMessage::from(&msg);
        assert_eq!(chat.role, Role::Tool);
        assert_eq!(chat.content, "result");
    }
}
