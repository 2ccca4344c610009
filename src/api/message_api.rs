//! 会話・メッセージ保存API
//!
//! 抽出結果をバックエンドへ送るクライアント。呼び出し側（アダプタ）は
//! 保存を切り離されたタスクとして実行し、失敗は報告のみ行う。

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::models::{Conversation, Message};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {status} from {endpoint}")]
    Status { status: u16, endpoint: String },
    #[error("Backend rejected {endpoint}: {message}")]
    Rejected { endpoint: String, message: String },
    #[error("Invalid API base URL '{0}'")]
    InvalidUrl(String),
}

/// バックエンドの共通レスポンス形式
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn save_chat(&self, chat: &Conversation) -> Result<(), ApiError>;

    async fn save_chat_batch(&self, chats: &[Conversation]) -> Result<(), ApiError>;

    async fn save_message(&self, message: &Message) -> Result<(), ApiError>;

    async fn save_message_batch(&self, messages: &[Message]) -> Result<(), ApiError>;
}

#[derive(Serialize)]
struct ChatBatch<'a> {
    chats: &'a [Conversation],
}

#[derive(Serialize)]
struct MessageBatch<'a> {
    messages: &'a [Message],
}

/// reqwest によるバックエンドクライアント
pub struct HttpMessageApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpMessageApi {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if url::Url::parse(&base_url).is_err() {
            return Err(ApiError::InvalidUrl(base_url));
        }

        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Bearer トークンを設定
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized + Sync>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<Option<ApiResponse>, ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!("📤 POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }

        let text = response.text().await?;
        let parsed = serde_json::from_str::<ApiResponse>(&text).ok();
        if let Some(ApiResponse {
            success: false,
            message,
            ..
        }) = &parsed
        {
            return Err(ApiError::Rejected {
                endpoint: endpoint.to_string(),
                message: message.clone().unwrap_or_default(),
            });
        }

        tracing::debug!("✅ {} saved", endpoint);
        Ok(parsed)
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn save_chat(&self, chat: &Conversation) -> Result<(), ApiError> {
        self.post("/save/chat", chat).await.map(|_| ())
    }

    async fn save_chat_batch(&self, chats: &[Conversation]) -> Result<(), ApiError> {
        self.post("/save/batch/chat", &ChatBatch { chats })
            .await
            .map(|_| ())
    }

    async fn save_message(&self, message: &Message) -> Result<(), ApiError> {
        self.post("/save/message", message).await.map(|_| ())
    }

    async fn save_message_batch(&self, messages: &[Message]) -> Result<(), ApiError> {
        self.post("/save/batch/message", &MessageBatch { messages })
            .await
            .map(|_| ())
    }
}

/// 送信せずに保存内容を保持する実装（ドライラン・テスト用）
#[derive(Default)]
pub struct InMemoryMessageApi {
    chats: Mutex<Vec<Conversation>>,
    messages: Mutex<Vec<Message>>,
    calls: Mutex<Vec<&'static str>>,
}

impl InMemoryMessageApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chats(&self) -> Vec<Conversation> {
        self.chats.lock().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    /// 呼び出されたエンドポイント名（呼び出し順）
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MessageApi for InMemoryMessageApi {
    async fn save_chat(&self, chat: &Conversation) -> Result<(), ApiError> {
        tracing::info!("💾 save_chat: {} ({})", chat.chat_provider_id, chat.title);
        self.calls.lock().push("save_chat");
        self.chats.lock().push(chat.clone());
        Ok(())
    }

    async fn save_chat_batch(&self, chats: &[Conversation]) -> Result<(), ApiError> {
        tracing::info!("💾 save_chat_batch: {} chats", chats.len());
        self.calls.lock().push("save_chat_batch");
        self.chats.lock().extend_from_slice(chats);
        Ok(())
    }

    async fn save_message(&self, message: &Message) -> Result<(), ApiError> {
        tracing::info!("💾 save_message: {}", message.message_provider_id);
        self.calls.lock().push("save_message");
        self.messages.lock().push(message.clone());
        Ok(())
    }

    async fn save_message_batch(&self, messages: &[Message]) -> Result<(), ApiError> {
        tracing::info!("💾 save_message_batch: {} messages", messages.len());
        self.calls.lock().push("save_message_batch");
        self.messages.lock().extend_from_slice(messages);
        Ok(())
    }
}
