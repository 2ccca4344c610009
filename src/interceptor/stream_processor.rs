//! Incremental buffering of streamed assistant replies.
//!
//! A processor is fed raw body chunks as they arrive and returns the
//! [`AssistantResponse`] snapshots that became available. Only snapshots with
//! `is_complete == true` are meant for extraction; interim ones exist for
//! live consumers and must be ignored by adapters.

use serde_json::Value;

use crate::models::{now_millis, AssistantResponse};

/// How a provider streams its completion responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// `event:`/`data:` blocks separated by blank lines
    ServerSentEvents,
    /// One `prefix:token` record per line
    LineProtocol,
}

impl StreamFormat {
    /// Builds a fresh processor for one response.
    pub fn processor(
        &self,
        request_body: Option<&Value>,
        interim_interval: usize,
    ) -> Box<dyn StreamProcessor> {
        match self {
            StreamFormat::ServerSentEvents => Box::new(ChatGptSseProcessor::new(interim_interval)),
            StreamFormat::LineProtocol => Box::new(MistralLineProcessor::from_request(request_body)),
        }
    }
}

pub trait StreamProcessor: Send {
    /// Feeds one chunk and returns any snapshots it produced.
    fn push(&mut self, chunk: &[u8]) -> Vec<AssistantResponse>;

    /// Signals end of stream; may flush a final complete snapshot.
    fn finish(&mut self) -> Vec<AssistantResponse>;
}

/// Splits off everything up to and including the first `delimiter`.
fn take_until(buffer: &mut Vec<u8>, delimiter: &[u8]) -> Option<String> {
    let position = buffer
        .windows(delimiter.len())
        .position(|window| window == delimiter)?;
    let rest = buffer.split_off(position + delimiter.len());
    let taken = std::mem::replace(buffer, rest);
    Some(String::from_utf8_lossy(&taken[..position]).into_owned())
}

#[derive(Debug, Clone)]
struct Step {
    role: Option<String>,
    content: String,
}

/// ChatGPT server-sent-event stream.
#[derive(Debug)]
pub struct ChatGptSseProcessor {
    buffer: Vec<u8>,
    response: AssistantResponse,
    steps: Vec<Step>,
    interim_interval: usize,
    last_interim_len: usize,
    completed_for: Option<String>,
}

impl ChatGptSseProcessor {
    pub const DEFAULT_INTERIM_INTERVAL: usize = 500;

    pub fn new(interim_interval: usize) -> Self {
        Self {
            buffer: Vec::new(),
            response: AssistantResponse::default(),
            steps: Vec::new(),
            interim_interval,
            last_interim_len: 0,
            completed_for: None,
        }
    }

    /// Current accumulated state.
    pub fn snapshot(&self) -> &AssistantResponse {
        &self.response
    }

    fn handle_event(&mut self, event: &str) -> Option<AssistantResponse> {
        let data = event
            .lines()
            .find_map(|line| line.strip_prefix("data: "))?
            .trim();

        if data == "[DONE]" {
            if self.response.has_content() {
                return self.complete();
            }
            return None;
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("⚠️ Error parsing stream data: {}", e);
                return None;
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("message_stream_complete") {
            if let Some(id) = value.get("conversation_id").and_then(Value::as_str) {
                self.response.conversation_id = Some(id.to_string());
            }
            if self.response.message_id.is_some() {
                return self.complete();
            }
            return None;
        }

        self.apply(&value);
        self.interim()
    }

    fn apply(&mut self, data: &Value) {
        let v = data.get("v");

        if let Some(message) = v.and_then(|v| v.get("message")) {
            self.start_step(message, v.and_then(|v| v.get("conversation_id")));
            return;
        }

        let op = data.get("o").and_then(Value::as_str);
        let path = data.get("p").and_then(Value::as_str);

        match (op, v) {
            (Some("append"), Some(Value::String(text))) if path == Some("/message/content/parts/0") => {
                self.append(text)
            }
            (None, Some(Value::String(text))) => self.append(text),
            (Some("patch"), Some(Value::Array(patches))) => {
                for patch in patches {
                    let is_append = patch.get("o").and_then(Value::as_str) == Some("append")
                        && patch.get("p").and_then(Value::as_str)
                            == Some("/message/content/parts/0");
                    if let (true, Some(text)) = (is_append, patch.get("v").and_then(Value::as_str)) {
                        self.append(text);
                    }
                }
                if self.response.content.is_empty() {
                    if let Some(last) = self
                        .steps
                        .last()
                        .filter(|step| step.role.as_deref() == Some("assistant"))
                    {
                        self.response.content = last.content.clone();
                    }
                }
            }
            _ => {}
        }
    }

    /// Every step, whatever its role, becomes the current message id; the
    /// response reports the last message seen in the stream.
    fn start_step(&mut self, message: &Value, conversation_id: Option<&Value>) {
        let metadata = message.get("metadata");
        let role = message
            .get("author")
            .and_then(|a| a.get("role"))
            .and_then(Value::as_str)
            .map(str::to_string);

        self.response.message_id = message.get("id").and_then(Value::as_str).map(str::to_string);
        self.response.conversation_id = conversation_id
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(self.response.conversation_id.take());
        self.response.model = metadata
            .and_then(|m| m.get("model_slug"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(create_time) = message.get("create_time").and_then(Value::as_f64) {
            self.response.create_time = Some(create_time);
        }
        if let Some(parent) = metadata
            .and_then(|m| m.get("parent_id"))
            .and_then(Value::as_str)
        {
            self.response.parent_message_id = Some(parent.to_string());
        }

        if role.as_deref() == Some("assistant") {
            self.response.content.clear();
            self.last_interim_len = 0;
        }
        self.steps.push(Step {
            role,
            content: String::new(),
        });
    }

    fn append(&mut self, text: &str) {
        let Some(step) = self.steps.last_mut() else {
            return;
        };
        step.content.push_str(text);
        if step.role.as_deref() == Some("assistant") {
            self.response.content.push_str(text);
        }
    }

    fn interim(&mut self) -> Option<AssistantResponse> {
        if self.interim_interval == 0 || self.response.message_id.is_none() {
            return None;
        }
        let len = self.response.content.chars().count();
        if len == 0 || len % self.interim_interval != 0 || len == self.last_interim_len {
            return None;
        }
        self.last_interim_len = len;
        let mut interim = self.response.clone();
        interim.is_complete = false;
        Some(interim)
    }

    fn complete(&mut self) -> Option<AssistantResponse> {
        if self.completed_for.is_some() && self.completed_for == self.response.message_id {
            return None;
        }
        self.response.is_complete = true;
        self.completed_for = self.response.message_id.clone();
        Some(self.response.clone())
    }
}

impl StreamProcessor for ChatGptSseProcessor {
    fn push(&mut self, chunk: &[u8]) -> Vec<AssistantResponse> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(event) = take_until(&mut self.buffer, b"\n\n") {
            out.extend(self.handle_event(&event));
        }
        out
    }

    fn finish(&mut self) -> Vec<AssistantResponse> {
        // A trailing event without its blank line
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            out.extend(self.handle_event(&rest));
        }
        if self.response.has_content() && !self.response.is_complete {
            tracing::debug!("🔚 Stream ended without completion marker");
            out.extend(self.complete());
        }
        out
    }
}

/// Mistral line-oriented stream.
#[derive(Debug)]
pub struct MistralLineProcessor {
    buffer: Vec<u8>,
    message_id: Option<String>,
    conversation_id: Option<String>,
    parent_message_id: Option<String>,
    content: String,
    completed: bool,
}

impl MistralLineProcessor {
    pub const MODEL: &'static str = "mistral";

    pub fn from_request(request_body: Option<&Value>) -> Self {
        let field = |name: &str| {
            request_body
                .and_then(|body| body.get(name))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            buffer: Vec::new(),
            message_id: None,
            conversation_id: field("chatId"),
            parent_message_id: field("parentMessageId"),
            content: String::new(),
            completed: false,
        }
    }

    fn handle_line(&mut self, line: &str) -> Option<AssistantResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if data == "[DONE]" {
                return self.complete();
            }
            match serde_json::from_str::<Value>(data) {
                Ok(value) => {
                    if let Some(id) = value.get("messageId").and_then(Value::as_str) {
                        self.message_id = Some(id.to_string());
                    }
                    for key in ["token", "content"] {
                        if let Some(text) = value.get(key).and_then(Value::as_str) {
                            self.content.push_str(text);
                        }
                    }
                }
                Err(_) => self.content.push_str(data),
            }
            return None;
        }

        let (_, token) = line.split_once(':')?;
        let token = token.trim();
        if token == "null" {
            return self.complete();
        }
        if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
            let decoded = serde_json::from_str::<String>(token)
                .unwrap_or_else(|_| token[1..token.len() - 1].to_string());
            self.content.push_str(&decoded);
        } else if let Ok(value) = serde_json::from_str::<Value>(token) {
            if let Some(id) = value.get("messageId").and_then(Value::as_str) {
                self.message_id = Some(id.to_string());
            }
        }
        None
    }

    fn complete(&mut self) -> Option<AssistantResponse> {
        if self.completed || self.content.is_empty() {
            return None;
        }
        self.completed = true;
        Some(AssistantResponse {
            message_id: Some(
                self.message_id
                    .clone()
                    .unwrap_or_else(|| format!("mistral-{}", now_millis())),
            ),
            conversation_id: self.conversation_id.clone(),
            model: Some(Self::MODEL.to_string()),
            content: self.content.clone(),
            is_complete: true,
            create_time: None,
            parent_message_id: self.parent_message_id.clone(),
        })
    }
}

impl StreamProcessor for MistralLineProcessor {
    fn push(&mut self, chunk: &[u8]) -> Vec<AssistantResponse> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(line) = take_until(&mut self.buffer, b"\n") {
            out.extend(self.handle_line(&line));
        }
        out
    }

    fn finish(&mut self) -> Vec<AssistantResponse> {
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            out.extend(self.handle_line(&rest));
        }
        out.extend(self.complete());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sse(data: &Value) -> String {
        format!("event: delta\ndata: {}\n\n", data)
    }

    fn assistant_start(id: &str) -> String {
        sse(&json!({
            "v": {
                "message": {
                    "id": id,
                    "author": {"role": "assistant"},
                    "create_time": 1_700_000_000.0,
                    "metadata": {"model_slug": "gpt-4o", "parent_id": "u1"}
                },
                "conversation_id": "c1"
            }
        }))
    }

    #[test]
    fn test_chatgpt_stream_completes_once() {
        let mut processor = ChatGptSseProcessor::new(500);
        let mut out = processor.push(assistant_start("a1").as_bytes());
        out.extend(processor.push(
            sse(&json!({"o": "append", "p": "/message/content/parts/0", "v": "Hel"})).as_bytes(),
        ));
        out.extend(processor.push(sse(&json!({"v": "lo"})).as_bytes()));
        out.extend(processor.push(sse(&json!({"type": "message_stream_complete"})).as_bytes()));
        out.extend(processor.push(b"data: [DONE]\n\n"));
        out.extend(processor.finish());

        assert_eq!(out.len(), 1);
        let response = &out[0];
        assert!(response.is_complete);
        assert_eq!(response.content, "Hello");
        assert_eq!(response.message_id.as_deref(), Some("a1"));
        assert_eq!(response.conversation_id.as_deref(), Some("c1"));
        assert_eq!(response.model.as_deref(), Some("gpt-4o"));
        assert_eq!(response.parent_message_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_chatgpt_tool_steps_do_not_leak_into_content() {
        let mut processor = ChatGptSseProcessor::new(4);
        let mut out = processor.push(
            sse(&json!({
                "v": {
                    "message": {"id": "t1", "author": {"role": "tool"}},
                    "conversation_id": "c1"
                }
            }))
            .as_bytes(),
        );
        out.extend(processor.push(sse(&json!({"v": "searching"})).as_bytes()));
        out.extend(processor.push(
            sse(&json!({
                "o": "patch",
                "v": [{"o": "append", "p": "/message/content/parts/0", "v": "calc"}]
            }))
            .as_bytes(),
        ));
        assert!(processor.snapshot().content.is_empty());

        out.extend(processor.push(assistant_start("a1").as_bytes()));
        out.extend(processor.push(
            sse(&json!({
                "o": "patch",
                "v": [{"o": "append", "p": "/message/content/parts/0", "v": "Ans"}]
            }))
            .as_bytes(),
        ));
        out.extend(processor.push(sse(&json!({"v": "wer"})).as_bytes()));
        out.extend(processor.push(b"data: [DONE]\n\n"));
        out.extend(processor.finish());

        assert!(out
            .iter()
            .all(|response| !response.content.contains("calc") && !response.content.contains("searching")));
        assert_eq!(out.len(), 1);
        assert!(out[0].is_complete);
        assert_eq!(out[0].content, "Answer");
        assert_eq!(out[0].message_id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_chatgpt_events_split_across_chunks() {
        let mut processor = ChatGptSseProcessor::new(500);
        let mut stream = assistant_start("a1");
        stream.push_str(&sse(&json!({"v": "héllo"})));
        stream.push_str("data: [DONE]\n\n");

        let bytes = stream.as_bytes();
        let mut out = Vec::new();
        for chunk in bytes.chunks(7) {
            out.extend(processor.push(chunk));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "héllo");
    }

    #[test]
    fn test_chatgpt_interim_updates_are_incomplete() {
        let mut processor = ChatGptSseProcessor::new(4);
        let mut out = processor.push(assistant_start("a1").as_bytes());
        out.extend(processor.push(sse(&json!({"v": "abcd"})).as_bytes()));
        out.extend(processor.push(sse(&json!({"v": "e"})).as_bytes()));

        assert_eq!(out.len(), 1);
        assert!(!out[0].is_complete);
        assert_eq!(out[0].content, "abcd");
    }

    #[test]
    fn test_chatgpt_stream_without_marker_flushes_on_finish() {
        let mut processor = ChatGptSseProcessor::new(500);
        processor.push(assistant_start("a1").as_bytes());
        processor.push(sse(&json!({"v": "partial"})).as_bytes());
        processor.push(b"data: {not json}\n\n");

        let out = processor.finish();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_complete);
        assert_eq!(out[0].content, "partial");
    }

    #[test]
    fn test_chatgpt_done_without_message_emits_nothing() {
        let mut processor = ChatGptSseProcessor::new(500);
        assert!(processor.push(b"data: [DONE]\n\n").is_empty());
        assert!(processor.finish().is_empty());
    }

    #[test]
    fn test_mistral_line_protocol() {
        let request = json!({"chatId": "chat-1", "parentMessageId": "u1"});
        let mut processor = MistralLineProcessor::from_request(Some(&request));

        let mut out = processor.push(b"0:\"Bon\"\n0:\"jour\\n\"\n");
        assert!(out.is_empty());
        out.extend(processor.push(b"e:null\n"));
        out.extend(processor.finish());

        assert_eq!(out.len(), 1);
        let response = &out[0];
        assert!(response.is_complete);
        assert_eq!(response.content, "Bonjour\n");
        assert_eq!(response.conversation_id.as_deref(), Some("chat-1"));
        assert_eq!(response.parent_message_id.as_deref(), Some("u1"));
        assert_eq!(response.model.as_deref(), Some("mistral"));
        assert!(response.message_id.as_deref().unwrap().starts_with("mistral-"));
    }

    #[test]
    fn test_mistral_data_lines() {
        let mut processor = MistralLineProcessor::from_request(None);
        processor.push(b"data: {\"messageId\":\"m1\",\"token\":\"Hi\"}\n");
        let out = processor.push(b"data: [DONE]\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message_id.as_deref(), Some("m1"));
        assert_eq!(out[0].content, "Hi");
        assert!(processor.finish().is_empty());
    }
}
