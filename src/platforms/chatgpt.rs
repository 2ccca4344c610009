//! ChatGPT adapter.
//!
//! A conversation arrives as a `mapping` object keyed by node id; each node
//! holds an optional message and its parent. Messages come back sorted by
//! their `create_time`.

use serde_json::Value;

use super::json::{conversations_from, require_str, str_field};
use super::{MessageBatch, PlatformAdapter};
use crate::error::ParseError;
use crate::interceptor::{EndpointSet, Pattern, StreamFormat};
use crate::models::{
    generated_user_message_id, join_parts, now_millis, seconds_to_millis, Conversation, Message,
    Provider, Role, DEFAULT_CONVERSATION_TITLE, UNKNOWN_MODEL, UNNAMED_CONVERSATION,
};

/// Synthetic root node of every mapping.
pub const ROOT_NODE_ID: &str = "client-created-root";

pub struct ChatGptAdapter {
    endpoints: EndpointSet,
}

impl ChatGptAdapter {
    pub fn new() -> Self {
        Self {
            endpoints: EndpointSet {
                user_info: Pattern::regex(r"/backend-api/me(\?.*)?$"),
                conversation_list: Some(Pattern::Contains("/backend-api/conversations")),
                chat_completion: Pattern::regex(r"/backend-api/(f/)?conversation$"),
                specific_conversation: Pattern::regex(r"/backend-api/conversation/([a-f0-9-]+)$"),
                completion_requires_post: true,
            },
        }
    }

    fn message_from_node(
        &self,
        conversation_id: &str,
        node_id: &str,
        node: &Value,
    ) -> Result<Option<Message>, ParseError> {
        let structure = format!("mapping node '{}'", node_id);
        let message = match node.get("message") {
            None | Some(Value::Null) => return Ok(None),
            Some(message @ Value::Object(_)) => message,
            Some(_) => return Err(ParseError::unexpected_type("message", structure, "object")),
        };

        let role = match message.get("author").and_then(|author| author.get("role")) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(role)) => role.as_str(),
            Some(_) => return Err(ParseError::unexpected_type("author.role", structure, "string")),
        };
        let Some(role) = Role::from_provider(role).filter(|_| role != "human") else {
            return Ok(None);
        };

        let content = message.get("content");
        let content = if content.and_then(|c| str_field(c, "content_type")) == Some("text") {
            match content.and_then(|c| c.get("parts")) {
                Some(Value::Array(parts)) => join_parts(parts),
                Some(Value::String(text)) => text.clone(),
                None | Some(Value::Null) => String::new(),
                Some(_) => return Err(ParseError::unexpected_type("content.parts", structure, "array")),
            }
        } else {
            String::new()
        };

        let created_at = match message.get("create_time") {
            None | Some(Value::Null) => now_millis(),
            Some(value) => value
                .as_f64()
                .map(seconds_to_millis)
                .ok_or_else(|| ParseError::invalid_timestamp(value.to_string()))?,
        };

        Ok(Some(Message {
            message_provider_id: node_id.to_string(),
            chat_provider_id: conversation_id.to_string(),
            content,
            role,
            model: message
                .get("metadata")
                .and_then(|m| str_field(m, "model_slug"))
                .unwrap_or(UNKNOWN_MODEL)
                .to_string(),
            created_at,
            parent_message_provider_id: str_field(node, "parent").map(str::to_string),
        }))
    }
}

impl Default for ChatGptAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// The first user-authored entry in a request's `messages`.
fn first_user_message(request_body: &Value) -> Option<&Value> {
    request_body
        .get("messages")?
        .as_array()?
        .iter()
        .find(|m| {
            m.get("author").and_then(|a| str_field(a, "role")) == Some("user")
                || str_field(m, "role") == Some("user")
        })
}

impl PlatformAdapter for ChatGptAdapter {
    fn provider(&self) -> Provider {
        Provider::ChatGpt
    }

    fn hostnames(&self) -> &'static [&'static str] {
        &["chatgpt.com", "chat.openai.com"]
    }

    fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    fn stream_format(&self) -> Option<StreamFormat> {
        Some(StreamFormat::ServerSentEvents)
    }

    fn should_process_stream(&self, request_body: Option<&Value>, is_event_stream: bool) -> bool {
        let first_role = request_body
            .and_then(|body| body.get("messages"))
            .and_then(|messages| messages.get(0))
            .and_then(|first| first.get("author"))
            .and_then(|author| str_field(author, "role"));
        is_event_stream && first_role == Some("user")
    }

    fn prompt_selector(&self) -> &'static str {
        "#prompt-textarea"
    }

    fn extract_conversation_list(&self, body: &Value) -> Result<Vec<Conversation>, ParseError> {
        match body.get("items") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(conversations_from(
                items,
                "id",
                "title",
                UNNAMED_CONVERSATION,
                Provider::ChatGpt,
            )),
            Some(_) => Err(ParseError::unexpected_type(
                "items",
                "ChatGPT conversation list",
                "array",
            )),
        }
    }

    fn extract_conversation(&self, body: &Value, _url: &str) -> Result<Conversation, ParseError> {
        let id = require_str(body, "conversation_id", "ChatGPT conversation")?;
        Ok(Conversation::new(
            id,
            str_field(body, "title"),
            DEFAULT_CONVERSATION_TITLE,
            Provider::ChatGpt,
        ))
    }

    fn extract_messages(&self, body: &Value, _url: &str) -> Result<MessageBatch, ParseError> {
        let conversation_id = require_str(body, "conversation_id", "ChatGPT conversation")?;
        let mapping = match body.get("mapping") {
            None | Some(Value::Null) => return Ok(MessageBatch::default()),
            Some(Value::Object(mapping)) => mapping,
            Some(_) => {
                return Err(ParseError::unexpected_type(
                    "mapping",
                    "ChatGPT conversation",
                    "object",
                ))
            }
        };

        let mut batch = MessageBatch::default();
        for (node_id, node) in mapping {
            if node_id == ROOT_NODE_ID {
                continue;
            }
            match self.message_from_node(conversation_id, node_id, node) {
                Ok(Some(message)) => batch.messages.push(message),
                Ok(None) => {}
                Err(e) => batch.skipped.push(e),
            }
        }

        batch.messages.sort_by_key(|message| message.created_at);
        Ok(batch)
    }

    fn extract_user_message(
        &self,
        request_body: &Value,
        _url: &str,
    ) -> Result<Option<Message>, ParseError> {
        let Some(message) = first_user_message(request_body) else {
            return Ok(None);
        };

        let content = match message.get("content") {
            Some(Value::String(text)) => text.clone(),
            Some(content @ Value::Object(_)) => match content.get("parts") {
                Some(Value::Array(parts)) => join_parts(parts),
                _ => String::new(),
            },
            _ => String::new(),
        };

        let created_at = message
            .get("create_time")
            .and_then(Value::as_f64)
            .map(seconds_to_millis)
            .unwrap_or_else(now_millis);

        Ok(Some(Message {
            message_provider_id: str_field(message, "id")
                .map(str::to_string)
                .unwrap_or_else(generated_user_message_id),
            chat_provider_id: str_field(request_body, "conversation_id")
                .unwrap_or_default()
                .to_string(),
            content,
            role: Role::User,
            model: str_field(request_body, "model")
                .unwrap_or(UNKNOWN_MODEL)
                .to_string(),
            created_at,
            parent_message_provider_id: str_field(request_body, "parent_message_id")
                .map(str::to_string),
        }))
    }
}
