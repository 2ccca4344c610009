//! Copilot adapter.
//!
//! History responses wrap everything in `results[]`. The conversation id is
//! not part of the payload, so it is taken from the history URL.

use serde_json::Value;

use super::json::{conversations_from, require_array, require_str, str_field};
use super::{MessageBatch, PlatformAdapter};
use crate::error::ParseError;
use crate::interceptor::{EndpointSet, Pattern};
use crate::models::{
    iso8601_to_millis, now_millis, Conversation, Message, Provider, Role,
    DEFAULT_CONVERSATION_TITLE,
};

pub struct CopilotAdapter {
    endpoints: EndpointSet,
}

impl CopilotAdapter {
    pub const MODEL: &'static str = "copilot";

    pub fn new() -> Self {
        Self {
            endpoints: EndpointSet {
                user_info: Some(Pattern::Contains("/c/api/user")),
                conversation_list: Some(Pattern::Contains("/c/api/conversations")),
                chat_completion: None,
                specific_conversation: Pattern::regex(
                    r"/c/api/conversations/([a-zA-Z0-9-]+)/history",
                ),
                completion_requires_post: false,
            },
        }
    }

    fn conversation_id(&self, url: &str) -> Result<String, ParseError> {
        self.endpoints
            .conversation_id(url)
            .ok_or_else(|| ParseError::missing_field("conversation id", "Copilot history URL"))
    }

    fn message_from_result(
        &self,
        conversation_id: &str,
        item: &Value,
    ) -> Result<Message, ParseError> {
        let id = require_str(item, "id", "Copilot message")?;
        let role = if str_field(item, "author") == Some("human") {
            Role::User
        } else {
            Role::Assistant
        };
        let content = match item.get("content") {
            Some(Value::Array(parts)) => parts
                .iter()
                .map(|part| str_field(part, "text").unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\n"),
            Some(content) => str_field(content, "text").unwrap_or_default().to_string(),
            None => String::new(),
        };
        let created_at = match str_field(item, "createdAt") {
            Some(timestamp) => iso8601_to_millis(timestamp)?,
            None => now_millis(),
        };

        Ok(Message {
            message_provider_id: id.to_string(),
            chat_provider_id: conversation_id.to_string(),
            content,
            role,
            model: Self::MODEL.to_string(),
            created_at,
            parent_message_provider_id: None,
        })
    }
}

impl Default for CopilotAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for CopilotAdapter {
    fn provider(&self) -> Provider {
        Provider::Copilot
    }

    fn hostnames(&self) -> &'static [&'static str] {
        &["copilot.microsoft.com"]
    }

    fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    fn default_model(&self) -> &'static str {
        Self::MODEL
    }

    fn prompt_selector(&self) -> &'static str {
        "#userInput"
    }

    fn extract_conversation_list(&self, body: &Value) -> Result<Vec<Conversation>, ParseError> {
        let Some(results) = body.get("results").filter(|r| !r.is_null()) else {
            return Ok(Vec::new());
        };
        let results = results.as_array().ok_or_else(|| {
            ParseError::unexpected_type("results", "Copilot conversation list", "array")
        })?;
        let chats: Vec<Value> = results
            .iter()
            .filter(|item| str_field(item, "type") == Some("chat"))
            .cloned()
            .collect();
        Ok(conversations_from(
            &chats,
            "id",
            "title",
            DEFAULT_CONVERSATION_TITLE,
            Provider::Copilot,
        ))
    }

    fn extract_conversation(&self, body: &Value, url: &str) -> Result<Conversation, ParseError> {
        let results = require_array(body, "results", "Copilot conversation")?;
        let id = self.conversation_id(url)?;
        let title = results.first().and_then(|first| str_field(first, "title"));
        Ok(Conversation::new(
            id,
            title,
            DEFAULT_CONVERSATION_TITLE,
            Provider::Copilot,
        ))
    }

    fn extract_messages(&self, body: &Value, url: &str) -> Result<MessageBatch, ParseError> {
        let results = require_array(body, "results", "Copilot conversation")?;
        let conversation_id = self.conversation_id(url)?;

        let mut batch = MessageBatch::default();
        for item in results {
            match self.message_from_result(&conversation_id, item) {
                Ok(message) => batch.messages.push(message),
                Err(e) => batch.skipped.push(e),
            }
        }
        Ok(batch)
    }

    fn extract_user_message(
        &self,
        _request_body: &Value,
        _url: &str,
    ) -> Result<Option<Message>, ParseError> {
        Ok(None)
    }

    fn extract_assistant_message(
        &self,
        _response: &crate::models::AssistantResponse,
    ) -> Option<Message> {
        None
    }
}
