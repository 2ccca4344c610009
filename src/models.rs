//! Normalized conversation and message model shared by every provider adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;

/// Title used when a provider omits one in list payloads.
pub const UNNAMED_CONVERSATION: &str = "Unnamed Conversation";

/// Title used when a provider omits one in a single-conversation payload.
pub const DEFAULT_CONVERSATION_TITLE: &str = "Conversation";

/// Model name used when a provider omits it.
pub const UNKNOWN_MODEL: &str = "unknown";

/// One supported AI chat website.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
pub enum Provider {
    #[display("ChatGPT")]
    #[serde(rename = "ChatGPT")]
    ChatGpt,
    #[display("Claude")]
    Claude,
    #[display("Mistral")]
    Mistral,
    #[display("Copilot")]
    Copilot,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::ChatGpt,
        Provider::Claude,
        Provider::Mistral,
        Provider::Copilot,
    ];

    /// Case-insensitive lookup by display name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|provider| provider.to_string().eq_ignore_ascii_case(name.trim()))
    }
}

/// Only user and assistant turns are extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[display("user")]
    User,
    #[display("assistant")]
    Assistant,
}

impl Role {
    /// Maps a provider role string, dropping system/tool roles.
    pub fn from_provider(role: &str) -> Option<Self> {
        match role {
            "user" | "human" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A provider conversation, as sent to `saveChat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub chat_provider_id: String,
    pub title: String,
    pub provider_name: Provider,
}

impl Conversation {
    pub fn new(
        chat_provider_id: impl Into<String>,
        title: Option<&str>,
        default_title: &str,
        provider_name: Provider,
    ) -> Self {
        let title = title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(default_title)
            .to_string();
        Self {
            chat_provider_id: chat_provider_id.into(),
            title,
            provider_name,
        }
    }

    pub fn has_id(&self) -> bool {
        !self.chat_provider_id.trim().is_empty()
    }
}

/// A single extracted chat turn, as sent to `saveMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_provider_id: String,
    /// May be empty for an outgoing message the provider has not yet assigned
    pub chat_provider_id: String,
    pub content: String,
    pub role: Role,
    pub model: String,
    /// Epoch milliseconds
    #[serde(alias = "timestamp")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_provider_id: Option<String>,
}

/// Accumulated state of a streamed assistant reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponse {
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub model: Option<String>,
    pub content: String,
    pub is_complete: bool,
    /// Epoch seconds as reported by the provider
    pub create_time: Option<f64>,
    pub parent_message_id: Option<String>,
}

impl AssistantResponse {
    pub fn has_content(&self) -> bool {
        self.message_id.is_some() && !self.content.is_empty()
    }
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts provider epoch seconds (possibly fractional) to milliseconds.
pub fn seconds_to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

/// Parses an ISO-8601 timestamp into epoch milliseconds.
pub fn iso8601_to_millis(value: &str) -> Result<i64, ParseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .or_else(|_| {
            // Some payloads omit the offset entirely
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc().timestamp_millis())
        })
        .map_err(|_| ParseError::invalid_timestamp(value))
}

/// Flattens an array of content parts into one newline-joined string.
///
/// String parts are taken as-is, object parts contribute their `text` field
/// and anything else is skipped.
pub fn join_parts(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            Value::String(text) => Some(text.as_str()),
            Value::Object(map) => map.get("text").and_then(Value::as_str),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Generated id for an outgoing user message the provider did not name.
pub fn generated_user_message_id() -> String {
    format!("user-{}", now_millis())
}
