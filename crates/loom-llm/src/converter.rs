//! Request/response mapping for the Anthropic Messages API.

use serde_json::{json, Value};

use loom_core::errors::GatewayError;
use loom_core::messages::Role;
use loom_core::provider::LlmRequest;

/// Placeholder turn used when the conversation would otherwise be empty.
const EMPTY_CONVERSATION: &str = "Begin.";

/// Build the non-streaming request body.
pub fn build_request_body(request: &LlmRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "messages": convert_messages(request),
    });
    if !request.system.is_empty() {
        body["system"] = json!(request.system);
    }
    body
}

/// The API only knows `user` and `assistant` turns and expects them to
/// alternate, starting with `user`. System and tool messages are folded
/// into user turns with a label; consecutive same-role turns are merged.
fn convert_messages(request: &LlmRequest) -> Vec<Value> {
    let mut turns: Vec<(&'static str, String)> = Vec::new();

    for message in &request.messages {
        let (role, text) = match message.role {
            Role::User => ("user", message.content.clone()),
            Role::Assistant => ("assistant", message.content.clone()),
            Role::System => ("user", format!("[system note]\n{}", message.content)),
            Role::Tool => ("user", format!("[tool result]\n{}", message.content)),
        };
        match turns.last_mut() {
            Some((last_role, last_text)) if *last_role == role => {
                last_text.push_str("\n\n");
                last_text.push_str(&text);
            }
            _ => turns.push((role, text)),
        }
    }

    if turns.first().map(|(role, _)| *role) != Some("user") {
        turns.insert(0, ("user", EMPTY_CONVERSATION.to_string()));
    }

    turns
        .into_iter()
        .map(|(role, text)| json!({"role": role, "content": text}))
        .collect()
}

/// Concatenate the text blocks of a Messages API response.
pub fn extract_text(body: &Value) -> Result<String, GatewayError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::MalformedResponse("missing content array".into()))?;

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(GatewayError::MalformedResponse(
            "response contained no text blocks".into(),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::messages::ChatMessage;

    fn request(messages: Vec<(Role, &str)>) -> LlmRequest {
        LlmRequest {
            system: "be brief".into(),
            messages: messages
                .into_iter()
                .map(|(role, content)| ChatMessage {
                    role,
                    content: content.into(),
                })
                .collect(),
            model: "claude-test".into(),
            max_tokens: 256,
            temperature: 0.2,
        }
    }

    #[test]
    fn body_carries_model_and_system() {
        let body = build_request_body(&request(vec![(Role::User, "hi")]));
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn tool_and_system_fold_into_user_turns() {
        let body = build_request_body(&request(vec![
            (Role::User, "plan it"),
            (Role::Assistant, "{\"tool_name\": \"current_time\"}"),
            (Role::Tool, "12:00"),
            (Role::System, "tool finished"),
        ]));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2]["role"], "user");
        let merged = messages[2]["content"].as_str().unwrap();
        assert!(merged.contains("[tool result]\n12:00"));
        assert!(merged.contains("[system note]\ntool finished"));
    }

    #[test]
    fn leading_assistant_gets_user_turn() {
        let body = build_request_body(&request(vec![(Role::Assistant, "hello")]));
        assert_eq!(body["messages"][0]["content"], EMPTY_CONVERSATION);
        assert_eq!(body["messages"][1]["role"], "assistant");

        let empty = build_request_body(&request(vec![]));
        assert_eq!(empty["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn extract_text_joins_blocks() {
        let body = json!({"content": [
            {"type": "text", "text": "{\"user_message\": "},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "\"hi\"}"}
        ]});
        assert_eq!(extract_text(&body).unwrap(), "{\"user_message\": \"hi\"}");
        assert!(extract_text(&json!({"content": []})).is_err());
        assert!(extract_text(&json!({})).is_err());
    }
}
