//! Mistral adapter.
//!
//! Only outgoing messages and streamed replies are extracted; the history
//! endpoints are classified but carry nothing worth saving.

use serde_json::Value;

use super::json::{non_empty, require_str, str_field};
use super::{MessageBatch, PlatformAdapter};
use crate::error::ParseError;
use crate::interceptor::{EndpointSet, Pattern, StreamFormat};
use crate::models::{
    generated_user_message_id, now_millis, Conversation, Message, Provider, Role,
    DEFAULT_CONVERSATION_TITLE,
};

pub struct MistralAdapter {
    endpoints: EndpointSet,
}

impl MistralAdapter {
    pub const MODEL: &'static str = "mistral";

    pub fn new() -> Self {
        Self {
            endpoints: EndpointSet {
                user_info: Some(Pattern::Contains("/api/trpc/user.session")),
                conversation_list: Some(Pattern::Contains("/api/trpc/chat.list")),
                chat_completion: Some(Pattern::Contains("/api/chat")),
                specific_conversation: None,
                completion_requires_post: true,
            },
        }
    }
}

impl Default for MistralAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Joins the `text` of every part, or takes a plain string as-is.
fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::Array(parts)) => parts
            .iter()
            .map(|part| str_field(part, "text").unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::String(text)) => text.clone(),
        _ => String::new(),
    }
}

impl PlatformAdapter for MistralAdapter {
    fn provider(&self) -> Provider {
        Provider::Mistral
    }

    fn hostnames(&self) -> &'static [&'static str] {
        &["chat.mistral.ai", "mistral.ai"]
    }

    fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    fn default_model(&self) -> &'static str {
        Self::MODEL
    }

    fn stream_format(&self) -> Option<StreamFormat> {
        Some(StreamFormat::LineProtocol)
    }

    fn prompt_selector(&self) -> &'static str {
        "textarea"
    }

    fn extract_conversation_list(&self, _body: &Value) -> Result<Vec<Conversation>, ParseError> {
        Ok(Vec::new())
    }

    fn extract_conversation(&self, body: &Value, _url: &str) -> Result<Conversation, ParseError> {
        let id = require_str(body, "chatId", "Mistral conversation")?;
        Ok(Conversation::new(
            id,
            str_field(body, "title"),
            DEFAULT_CONVERSATION_TITLE,
            Provider::Mistral,
        ))
    }

    fn extract_messages(&self, _body: &Value, _url: &str) -> Result<MessageBatch, ParseError> {
        Ok(MessageBatch::default())
    }

    fn extract_user_message(
        &self,
        request_body: &Value,
        _url: &str,
    ) -> Result<Option<Message>, ParseError> {
        let mut message_id = non_empty(request_body, "messageId").map(str::to_string);
        let mut conversation_id = str_field(request_body, "chatId").unwrap_or_default().to_string();
        let mut parent = non_empty(request_body, "parentMessageId").map(str::to_string);

        // The first message of a new chat is wrapped as {"0": {"json": {...}}}
        let content = match request_body.get("0").and_then(|first| first.get("json")) {
            Some(json) => {
                if let Some(id) = non_empty(json, "messageId") {
                    message_id = Some(id.to_string());
                }
                if let Some(id) = non_empty(json, "chatId") {
                    conversation_id = id.to_string();
                }
                if let Some(id) = non_empty(json, "parentMessageId") {
                    parent = Some(id.to_string());
                }
                text_of(json.get("content"))
            }
            None => text_of(request_body.get("messageInput")),
        };

        if content.is_empty() {
            return Ok(None);
        }

        Ok(Some(Message {
            message_provider_id: message_id.unwrap_or_else(generated_user_message_id),
            chat_provider_id: conversation_id,
            content,
            role: Role::User,
            model: non_empty(request_body, "model")
                .unwrap_or(Self::MODEL)
                .to_string(),
            created_at: now_millis(),
            parent_message_provider_id: parent,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InterceptKind;
    use crate::models::AssistantResponse;
    use serde_json::json;

    #[test]
    fn test_classification() {
        let adapter = MistralAdapter::new();
        let endpoints = adapter.endpoints();
        assert_eq!(
            endpoints.classify("https://chat.mistral.ai/api/chat", "POST"),
            Some(InterceptKind::ChatCompletion)
        );
        assert_eq!(endpoints.classify("https://chat.mistral.ai/api/chat", "GET"), None);
        assert_eq!(
            endpoints.classify(
                "https://chat.mistral.ai/api/trpc/chat.list?batch=1&input=%7B%7D",
                "GET"
            ),
            Some(InterceptKind::ConversationList)
        );
        assert_eq!(
            endpoints.classify("https://chat.mistral.ai/api/trpc/user.session", "GET"),
            Some(InterceptKind::UserInfo)
        );
    }

    #[test]
    fn test_user_message_from_message_input() {
        let adapter = MistralAdapter::new();
        let request = json!({
            "chatId": "chat-1",
            "messageId": "msg-1",
            "parentMessageId": "msg-0",
            "messageInput": [{"type": "text", "text": "Bonjour"}, {"type": "text", "text": "Mistral"}],
            "mode": "append"
        });
        let message = adapter.extract_user_message(&request, "").unwrap().unwrap();
        assert_eq!(message.message_provider_id, "msg-1");
        assert_eq!(message.chat_provider_id, "chat-1");
        assert_eq!(message.content, "Bonjour\nMistral");
        assert_eq!(message.model, "mistral");
        assert_eq!(message.parent_message_provider_id.as_deref(), Some("msg-0"));
    }

    #[test]
    fn test_user_message_from_wrapped_first_message() {
        let adapter = MistralAdapter::new();
        let request = json!({"0": {"json": {
            "chatId": "chat-2",
            "content": [{"type": "text", "text": "first"}]
        }}});
        let message = adapter.extract_user_message(&request, "").unwrap().unwrap();
        assert_eq!(message.chat_provider_id, "chat-2");
        assert_eq!(message.content, "first");
        assert!(message.message_provider_id.starts_with("user-"));

        assert!(adapter
            .extract_user_message(&json!({"chatId": "x"}), "")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_history_is_a_no_op() {
        let adapter = MistralAdapter::new();
        assert!(adapter
            .extract_conversation_list(&json!([{"id": "x"}]))
            .unwrap()
            .is_empty());
        assert!(adapter
            .extract_messages(&json!({"chatId": "x"}), "")
            .unwrap()
            .messages
            .is_empty());
    }

    #[test]
    fn test_assistant_model_default() {
        let adapter = MistralAdapter::new();
        let response = AssistantResponse {
            message_id: Some("m1".to_string()),
            content: "Salut".to_string(),
            is_complete: true,
            ..Default::default()
        };
        let message = adapter.extract_assistant_message(&response).unwrap();
        assert_eq!(message.model, "mistral");
        assert_eq!(message.chat_provider_id, "");
    }
}
