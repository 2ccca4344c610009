//! Per-provider adapters.
//!
//! Each adapter is a pure transformation from provider-native JSON into the
//! normalized [`Conversation`]/[`Message`] model, plus the provided handlers
//! that turn extraction results into bus events and detached save tasks.
//! Handlers never fail: parsing problems go to the [`ErrorReporter`] as
//! `PARSING_ERROR`, save failures as `API_ERROR`.

pub mod chatgpt;
pub mod claude;
pub mod copilot;
pub mod dispatcher;
pub mod mistral;
pub mod prompt;
pub mod registry;

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::api::{ApiError, MessageApi};
use crate::error::{AppError, ErrorReporter, ParseError};
use crate::events::{EventBus, JaydaiEvent};
use crate::interceptor::{EndpointSet, StreamFormat};
use crate::models::{
    now_millis, seconds_to_millis, AssistantResponse, Conversation, Message, Provider, Role,
    UNKNOWN_MODEL,
};

pub use chatgpt::ChatGptAdapter;
pub use claude::ClaudeAdapter;
pub use copilot::CopilotAdapter;
pub use dispatcher::PlatformDispatcher;
pub use mistral::MistralAdapter;
pub use prompt::{InputKind, PromptError, PromptInput, PromptSurface};
pub use registry::PlatformRegistry;

/// A detached save; awaiting it is optional.
pub type SaveTask = JoinHandle<()>;

/// Collaborators every handler needs.
#[derive(Clone)]
pub struct PlatformContext {
    pub bus: EventBus,
    pub api: Arc<dyn MessageApi>,
    pub reporter: Arc<dyn ErrorReporter>,
}

impl PlatformContext {
    pub fn new(bus: EventBus, api: Arc<dyn MessageApi>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { bus, api, reporter }
    }

    fn report_parse(&self, message: &str, error: &ParseError) {
        self.reporter.capture_error(AppError::parsing(message, error));
    }

    /// Runs a save in the background; failures become `API_ERROR` reports.
    /// Without a tokio runtime the save is skipped and an `EXTENSION_ERROR`
    /// is reported.
    fn spawn_save<F>(&self, what: &'static str, save: F) -> Option<SaveTask>
    where
        F: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.reporter
                    .capture_error(AppError::extension(format!("Cannot save {}", what), e));
                return None;
            }
        };
        let reporter = self.reporter.clone();
        Some(runtime.spawn(async move {
            match save.await {
                Ok(()) => tracing::debug!("💾 {} saved", what),
                Err(e) => reporter.capture_error(AppError::api(format!("Error saving {}", what), e)),
            }
        }))
    }
}

/// Messages extracted from one payload, plus the items that failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageBatch {
    pub messages: Vec<Message>,
    pub skipped: Vec<ParseError>,
}

pub trait PlatformAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    fn hostnames(&self) -> &'static [&'static str];

    fn endpoints(&self) -> &EndpointSet;

    /// Model name used when a payload omits one.
    fn default_model(&self) -> &'static str {
        UNKNOWN_MODEL
    }

    fn stream_format(&self) -> Option<StreamFormat> {
        None
    }

    /// Whether a chat-completion response should be fed to a stream processor.
    fn should_process_stream(&self, _request_body: Option<&Value>, _is_event_stream: bool) -> bool {
        self.stream_format().is_some()
    }

    /// CSS selector of the prompt input.
    fn prompt_selector(&self) -> &'static str;

    fn matches_hostname(&self, hostname: &str) -> bool {
        self.hostnames().iter().any(|known| hostname.contains(known))
    }

    fn extract_conversation_list(&self, body: &Value) -> Result<Vec<Conversation>, ParseError>;

    fn extract_conversation(&self, body: &Value, url: &str) -> Result<Conversation, ParseError>;

    fn extract_messages(&self, body: &Value, url: &str) -> Result<MessageBatch, ParseError>;

    /// The outgoing user message of a chat-completion request, if any.
    fn extract_user_message(
        &self,
        request_body: &Value,
        url: &str,
    ) -> Result<Option<Message>, ParseError>;

    /// Only complete responses with an id and content become messages.
    fn extract_assistant_message(&self, response: &AssistantResponse) -> Option<Message> {
        if !response.is_complete {
            return None;
        }
        let message_id = response.message_id.as_deref().filter(|id| !id.is_empty())?;
        if response.content.is_empty() {
            return None;
        }
        Some(Message {
            message_provider_id: message_id.to_string(),
            chat_provider_id: response.conversation_id.clone().unwrap_or_default(),
            content: response.content.clone(),
            role: Role::Assistant,
            model: response
                .model
                .clone()
                .unwrap_or_else(|| self.default_model().to_string()),
            created_at: response
                .create_time
                .map(seconds_to_millis)
                .unwrap_or_else(now_millis),
            parent_message_provider_id: response.parent_message_id.clone(),
        })
    }

    fn handle_conversation_list(&self, ctx: &PlatformContext, body: &Value) -> Option<SaveTask> {
        let chats = match self.extract_conversation_list(body) {
            Ok(chats) => chats,
            Err(e) => {
                ctx.report_parse(
                    &format!("Error handling {} conversation list", self.provider()),
                    &e,
                );
                return None;
            }
        };
        if chats.is_empty() {
            return None;
        }

        tracing::info!("📋 {} conversations listed on {}", chats.len(), self.provider());
        let api = ctx.api.clone();
        ctx.spawn_save("chat batch", async move { api.save_chat_batch(&chats).await })
    }

    fn handle_specific_conversation(
        &self,
        ctx: &PlatformContext,
        url: &str,
        body: &Value,
    ) -> Option<SaveTask> {
        let conversation = match self.extract_conversation(body, url) {
            Ok(conversation) => conversation,
            Err(e) => {
                ctx.report_parse("Error handling specific conversation", &e);
                return None;
            }
        };
        let batch = match self.extract_messages(body, url) {
            Ok(batch) => batch,
            Err(e) => {
                ctx.report_parse("Error extracting messages from conversation", &e);
                return None;
            }
        };
        for skipped in &batch.skipped {
            ctx.report_parse("Error extracting message", skipped);
        }

        if !conversation.has_id() || batch.messages.is_empty() {
            tracing::debug!(
                conversation = %conversation.chat_provider_id,
                messages = batch.messages.len(),
                "Nothing to persist"
            );
            return None;
        }

        let messages = batch.messages;
        tracing::info!(
            "💬 Loaded {} messages for {} conversation {}",
            messages.len(),
            self.provider(),
            conversation.chat_provider_id
        );
        ctx.bus.publish(JaydaiEvent::ConversationLoaded {
            conversation: conversation.clone(),
            messages: messages.clone(),
        });

        let api = ctx.api.clone();
        ctx.spawn_save("conversation", async move {
            api.save_chat(&conversation).await?;
            api.save_message_batch(&messages).await
        })
    }

    fn handle_chat_completion(&self, ctx: &PlatformContext, url: &str, request_body: Option<&Value>) {
        let Some(request_body) = request_body else {
            return;
        };
        match self.extract_user_message(request_body, url) {
            Ok(Some(message)) => {
                crate::utils::dump_message(&message, "chat completion");
                ctx.bus.publish(JaydaiEvent::MessageExtracted {
                    message,
                    platform: self.provider(),
                });
            }
            Ok(None) => {}
            Err(e) => ctx.report_parse("Error handling chat completion", &e),
        }
    }

    fn handle_assistant_response(&self, ctx: &PlatformContext, response: &AssistantResponse) {
        if !response.is_complete {
            return;
        }
        if let Some(message) = self.extract_assistant_message(response) {
            crate::utils::dump_message(&message, "assistant response");
            ctx.bus.publish(JaydaiEvent::MessageExtracted {
                message,
                platform: self.provider(),
            });
        }
    }

    fn insert_prompt(&self, surface: &dyn PromptSurface, content: &str) -> bool {
        prompt::insert_prompt(surface, self.prompt_selector(), content)
    }
}

/// Field access helpers shared by the adapters.
pub(crate) mod json {
    use super::*;

    pub fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
        value.get(field).and_then(Value::as_str)
    }

    pub fn non_empty<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
        str_field(value, field).filter(|s| !s.trim().is_empty())
    }

    pub fn require_str<'a>(
        value: &'a Value,
        field: &str,
        structure: &str,
    ) -> Result<&'a str, ParseError> {
        match value.get(field) {
            None | Some(Value::Null) => Err(ParseError::missing_field(field, structure)),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(ParseError::unexpected_type(field, structure, "string")),
        }
    }

    pub fn require_array<'a>(
        value: &'a Value,
        field: &str,
        structure: &str,
    ) -> Result<&'a Vec<Value>, ParseError> {
        match value.get(field) {
            None | Some(Value::Null) => Err(ParseError::missing_field(field, structure)),
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(ParseError::unexpected_type(field, structure, "array")),
        }
    }

    /// List items whose id field is missing or blank are dropped.
    pub fn conversations_from(
        items: &[Value],
        id_field: &str,
        title_field: &str,
        default_title: &str,
        provider: Provider,
    ) -> Vec<Conversation> {
        items
            .iter()
            .filter_map(|item| {
                let id = non_empty(item, id_field)?;
                Some(Conversation::new(
                    id,
                    str_field(item, title_field),
                    default_title,
                    provider,
                ))
            })
            .collect()
    }
}
