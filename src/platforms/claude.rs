//! Claude adapter.
//!
//! Conversations carry a flat `chat_messages` array whose order is given by
//! each entry's `index`, not by wall-clock time.

use serde_json::Value;

use super::json::{conversations_from, non_empty, require_str, str_field};
use super::{MessageBatch, PlatformAdapter};
use crate::error::ParseError;
use crate::interceptor::{request_path, EndpointSet, Pattern};
use crate::models::{
    generated_user_message_id, iso8601_to_millis, now_millis, Conversation, Message, Provider,
    Role, DEFAULT_CONVERSATION_TITLE, UNNAMED_CONVERSATION,
};

pub struct ClaudeAdapter {
    endpoints: EndpointSet,
    completion_conversation: Option<Pattern>,
}

impl ClaudeAdapter {
    pub const MODEL: &'static str = "claude";

    pub fn new() -> Self {
        Self {
            endpoints: EndpointSet {
                user_info: Some(Pattern::Contains("/api/user")),
                conversation_list: Pattern::regex(
                    r"/api/organizations/[a-f0-9-]+/chat_conversations(\?.*)?$",
                ),
                chat_completion: Pattern::regex(
                    r"/api/organizations/[a-f0-9-]+/chat_conversations/[a-f0-9-]+/completion",
                ),
                specific_conversation: Pattern::regex(
                    r"/api/organizations/[a-f0-9-]+/chat_conversations/([a-f0-9-]+)(\?.*)?$",
                ),
                completion_requires_post: false,
            },
            completion_conversation: Pattern::regex(r"/chat_conversations/([a-f0-9-]+)/completion"),
        }
    }

    fn message_from_entry(
        &self,
        conversation_id: &str,
        model: &str,
        entry: &Value,
    ) -> Result<Option<(i64, Message)>, ParseError> {
        if entry.is_null() {
            return Ok(None);
        }
        let sender = match entry.get("sender") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(sender)) => sender.as_str(),
            Some(_) => {
                return Err(ParseError::unexpected_type(
                    "sender",
                    "Claude chat message",
                    "string",
                ))
            }
        };
        let Some(role) = Role::from_provider(sender) else {
            return Ok(None);
        };

        let uuid = require_str(entry, "uuid", "Claude chat message")?;

        let content = match entry.get("content") {
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter(|block| str_field(block, "type") == Some("text"))
                .map(|block| str_field(block, "text").unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\n"),
            _ => str_field(entry, "text").unwrap_or_default().to_string(),
        };

        let created_at = match str_field(entry, "created_at") {
            Some(timestamp) => iso8601_to_millis(timestamp)?,
            None => now_millis(),
        };
        let index = entry.get("index").and_then(Value::as_i64).unwrap_or(0);

        Ok(Some((
            index,
            Message {
                message_provider_id: uuid.to_string(),
                chat_provider_id: conversation_id.to_string(),
                content,
                role,
                model: model.to_string(),
                created_at,
                parent_message_provider_id: non_empty(entry, "parent_message_uuid")
                    .map(str::to_string),
            },
        )))
    }

    fn conversation_id_from_completion(&self, url: &str) -> Option<String> {
        self.completion_conversation
            .as_ref()
            .and_then(|pattern| pattern.capture(&request_path(url)))
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for ClaudeAdapter {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn hostnames(&self) -> &'static [&'static str] {
        &["claude.ai"]
    }

    fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    fn default_model(&self) -> &'static str {
        Self::MODEL
    }

    fn prompt_selector(&self) -> &'static str {
        r#"[aria-label="Write your prompt to Claude"] [contenteditable="true"]"#
    }

    fn extract_conversation_list(&self, body: &Value) -> Result<Vec<Conversation>, ParseError> {
        match body {
            Value::Array(items) => Ok(conversations_from(
                items,
                "uuid",
                "name",
                UNNAMED_CONVERSATION,
                Provider::Claude,
            )),
            Value::Null => Ok(Vec::new()),
            _ => Err(ParseError::unexpected_type(
                "body",
                "Claude conversation list",
                "array",
            )),
        }
    }

    fn extract_conversation(&self, body: &Value, _url: &str) -> Result<Conversation, ParseError> {
        let id = require_str(body, "uuid", "Claude conversation")?;
        Ok(Conversation::new(
            id,
            str_field(body, "name"),
            DEFAULT_CONVERSATION_TITLE,
            Provider::Claude,
        ))
    }

    fn extract_messages(&self, body: &Value, _url: &str) -> Result<MessageBatch, ParseError> {
        let conversation_id = require_str(body, "uuid", "Claude conversation")?;
        let entries = match body.get("chat_messages") {
            None | Some(Value::Null) => return Ok(MessageBatch::default()),
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                return Err(ParseError::unexpected_type(
                    "chat_messages",
                    "Claude conversation",
                    "array",
                ))
            }
        };
        let model = non_empty(body, "model").unwrap_or(Self::MODEL);

        let mut indexed = Vec::with_capacity(entries.len());
        let mut skipped = Vec::new();
        for entry in entries {
            match self.message_from_entry(conversation_id, model, entry) {
                Ok(Some(item)) => indexed.push(item),
                Ok(None) => {}
                Err(e) => skipped.push(e),
            }
        }

        indexed.sort_by_key(|(index, _)| *index);
        Ok(MessageBatch {
            messages: indexed.into_iter().map(|(_, message)| message).collect(),
            skipped,
        })
    }

    fn extract_user_message(
        &self,
        request_body: &Value,
        url: &str,
    ) -> Result<Option<Message>, ParseError> {
        let content = match request_body.get("prompt") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(prompt)) => prompt.clone(),
            Some(_) => {
                return Err(ParseError::unexpected_type(
                    "prompt",
                    "Claude completion request",
                    "string",
                ))
            }
        };

        let chat_provider_id = non_empty(request_body, "conversation_id")
            .map(str::to_string)
            .or_else(|| self.conversation_id_from_completion(url))
            .unwrap_or_default();

        Ok(Some(Message {
            message_provider_id: generated_user_message_id(),
            chat_provider_id,
            content,
            role: Role::User,
            model: non_empty(request_body, "model")
                .unwrap_or(Self::MODEL)
                .to_string(),
            created_at: now_millis(),
            parent_message_provider_id: non_empty(request_body, "parent_message_uuid")
                .map(str::to_string),
        }))
    }
}
