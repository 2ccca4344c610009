//! fetchインターセプタ
//!
//! ページの fetch を一度だけラップし、分類済みのリクエストについて
//! 応答を複製（ストリームは tee）してイベントバスへ発行する。
//! ホストページに返す応答は常に元のまま。

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::fetch::{BodyStream, Fetch, FetchError, FetchRequest, FetchResponse, FetchSlot, ResponseBody};
use super::stream_processor::{ChatGptSseProcessor, StreamProcessor};
use crate::error::parse_json_body;
use crate::events::{EventBus, InterceptData, InterceptKind, InterceptedTraffic, JaydaiEvent};
use crate::io::{CaptureRecorder, CapturedExchange};
use crate::models::{now_millis, AssistantResponse};
use crate::platforms::PlatformAdapter;

/// インターセプタの調整項目
#[derive(Debug, Clone)]
pub struct InterceptorSettings {
    /// 途中経過を発行する文字数間隔（0 で無効）
    pub interim_interval: usize,
}

impl Default for InterceptorSettings {
    fn default() -> Self {
        Self {
            interim_interval: ChatGptSseProcessor::DEFAULT_INTERIM_INTERVAL,
        }
    }
}

/// 分類済みリクエストのメタデータ
#[derive(Debug, Clone)]
struct Exchange {
    kind: InterceptKind,
    url: String,
    method: String,
    request_body: Option<Value>,
    status: u16,
    content_type: Option<String>,
}

impl Exchange {
    fn is_event_stream(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false)
    }
}

/// 応答の観測と発行を担当（各リクエストのタスク間で共有）
#[derive(Clone)]
struct Observer {
    adapter: Arc<dyn PlatformAdapter>,
    bus: EventBus,
    settings: InterceptorSettings,
    recorder: Option<Arc<CaptureRecorder>>,
}

impl Observer {
    fn publish(&self, kind: InterceptKind, data: InterceptData) {
        let traffic = InterceptedTraffic {
            kind,
            platform: self.adapter.provider(),
            data,
            timestamp: now_millis(),
        };
        self.bus.publish(JaydaiEvent::intercepted(traffic));
    }

    fn publish_completion(&self, exchange: &Exchange) {
        self.publish(
            InterceptKind::ChatCompletion,
            InterceptData::ChatCompletion {
                url: exchange.url.clone(),
                request_body: exchange.request_body.clone(),
            },
        );
    }

    fn publish_responses(&self, responses: Vec<AssistantResponse>) {
        for response in responses {
            tracing::debug!(
                message_id = ?response.message_id,
                complete = response.is_complete,
                length = response.content.len(),
                "🤖 Assistant response"
            );
            self.publish(
                InterceptKind::AssistantResponse,
                InterceptData::AssistantResponse(response),
            );
        }
    }

    fn publish_exchange(&self, exchange: &Exchange, body: &[u8]) {
        match parse_json_body(body) {
            Ok(response_body) => self.publish(
                exchange.kind,
                InterceptData::Exchange {
                    url: exchange.url.clone(),
                    method: exchange.method.clone(),
                    request_body: exchange.request_body.clone(),
                    response_body,
                },
            ),
            Err(e) => {
                tracing::warn!("⚠️ Could not parse response from {}: {}", exchange.url, e);
            }
        }
    }

    fn stream_processor(&self, exchange: &Exchange) -> Option<Box<dyn StreamProcessor>> {
        if exchange.kind != InterceptKind::ChatCompletion {
            return None;
        }
        let format = self.adapter.stream_format()?;
        if !self
            .adapter
            .should_process_stream(exchange.request_body.as_ref(), exchange.is_event_stream())
        {
            return None;
        }
        Some(format.processor(
            exchange.request_body.as_ref(),
            self.settings.interim_interval,
        ))
    }

    async fn record(&self, exchange: &Exchange, body: &[u8]) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let captured = CapturedExchange {
            timestamp: now_millis(),
            url: exchange.url.clone(),
            method: exchange.method.clone(),
            request_body: exchange.request_body.clone(),
            status: exchange.status,
            content_type: exchange.content_type.clone(),
            response_body: String::from_utf8_lossy(body).into_owned(),
        };
        if let Err(e) = recorder.record(&captured).await {
            tracing::warn!("⚠️ Failed to record exchange: {}", e);
        }
    }

    /// バッファ済みの応答を処理する
    async fn observe_full(&self, exchange: &Exchange, body: &[u8]) {
        self.record(exchange, body).await;
        match exchange.kind {
            InterceptKind::ChatCompletion => {
                self.publish_completion(exchange);
                if let Some(mut processor) = self.stream_processor(exchange) {
                    let mut responses = processor.push(body);
                    responses.extend(processor.finish());
                    self.publish_responses(responses);
                }
            }
            _ if exchange.is_event_stream() => {}
            _ => self.publish_exchange(exchange, body),
        }
    }

    /// ストリーム応答を tee し、複製側を別タスクで処理する
    fn observe_stream(&self, exchange: Exchange, stream: BodyStream) -> BodyStream {
        let mut processor = None;
        if exchange.kind == InterceptKind::ChatCompletion {
            self.publish_completion(&exchange);
            processor = self.stream_processor(&exchange);
        }
        let parse_json = exchange.kind != InterceptKind::ChatCompletion && !exchange.is_event_stream();
        let collect = parse_json || self.recorder.is_some();

        if processor.is_none() && !collect {
            return stream;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(url = %exchange.url, "⚠️ No tokio runtime, stream passed through unobserved");
            return stream;
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let observer = self.clone();
        runtime.spawn(async move {
            let mut collected = Vec::new();
            while let Some(chunk) = rx.recv().await {
                if let Some(processor) = processor.as_mut() {
                    observer.publish_responses(processor.push(&chunk));
                }
                if collect {
                    collected.extend_from_slice(&chunk);
                }
            }
            if let Some(processor) = processor.as_mut() {
                observer.publish_responses(processor.finish());
            }
            observer.record(&exchange, &collected).await;
            if parse_json {
                observer.publish_exchange(&exchange, &collected);
            }
            tracing::trace!(url = %exchange.url, "🔚 Stream observation finished");
        });

        Box::pin(stream.inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                // 受信側が終了していても本体の転送は続ける
                let _ = tx.send(bytes.clone());
            }
        }))
    }
}

/// ページの fetch をラップする実装
pub struct InterceptingFetch {
    original: Arc<dyn Fetch>,
    observer: Observer,
}

impl InterceptingFetch {
    pub fn new(
        original: Arc<dyn Fetch>,
        adapter: Arc<dyn PlatformAdapter>,
        bus: EventBus,
        settings: InterceptorSettings,
    ) -> Self {
        Self {
            original,
            observer: Observer {
                adapter,
                bus,
                settings,
                recorder: None,
            },
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<CaptureRecorder>) -> Self {
        self.observer.recorder = Some(recorder);
        self
    }

    fn classify(&self, request: &FetchRequest) -> Option<InterceptKind> {
        self.observer
            .adapter
            .endpoints()
            .classify(&request.url, &request.method)
    }
}

#[async_trait]
impl Fetch for InterceptingFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let Some(kind) = self.classify(&request) else {
            return self.original.fetch(request).await;
        };

        tracing::debug!(kind = ?kind, url = %request.url, "🔍 Intercepting request");

        let url = request.url.clone();
        let method = request.method.clone();
        let request_body = request.json_body();

        let response = self.original.fetch(request).await?;
        if !response.is_success() {
            tracing::debug!(status = response.status, url = %url, "⏭️ Skipping unsuccessful response");
            return Ok(response);
        }

        let exchange = Exchange {
            kind,
            url,
            method,
            request_body,
            status: response.status,
            content_type: response.header("content-type").map(str::to_string),
        };

        let FetchResponse {
            status,
            headers,
            body,
        } = response;

        let body = match body {
            ResponseBody::Full(bytes) => {
                self.observer.observe_full(&exchange, &bytes).await;
                ResponseBody::Full(bytes)
            }
            ResponseBody::Stream(stream) => {
                ResponseBody::Stream(self.observer.observe_stream(exchange, stream))
            }
        };

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }

    fn original(&self) -> Option<Arc<dyn Fetch>> {
        Some(self.original.clone())
    }
}

/// FetchSlot へのインストールと復元
pub struct FetchInterceptor {
    slot: FetchSlot,
    adapter: Arc<dyn PlatformAdapter>,
    bus: EventBus,
    settings: InterceptorSettings,
    recorder: Option<Arc<CaptureRecorder>>,
}

impl FetchInterceptor {
    pub fn new(slot: FetchSlot, adapter: Arc<dyn PlatformAdapter>, bus: EventBus) -> Self {
        Self {
            slot,
            adapter,
            bus,
            settings: InterceptorSettings::default(),
            recorder: None,
        }
    }

    pub fn with_settings(mut self, settings: InterceptorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<CaptureRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// ラップをインストール（既にインストール済みなら何もしない）
    pub fn install(&self) -> bool {
        let installed = self.slot.replace_with(|current| {
            if current.is_intercepting() {
                return None;
            }
            let mut wrapped = InterceptingFetch::new(
                current.clone(),
                self.adapter.clone(),
                self.bus.clone(),
                self.settings.clone(),
            );
            if let Some(recorder) = &self.recorder {
                wrapped = wrapped.with_recorder(recorder.clone());
            }
            Some(Arc::new(wrapped))
        });

        if installed {
            tracing::info!("🪝 Fetch interceptor installed for {}", self.adapter.provider());
        } else {
            tracing::debug!("Fetch interceptor already installed");
        }
        installed
    }

    /// 元の fetch に戻す
    pub fn restore(&self) -> bool {
        let restored = self.slot.replace_with(|current| current.original());
        if restored {
            tracing::info!("🔙 Original fetch restored");
        }
        restored
    }

    pub fn is_installed(&self) -> bool {
        self.slot.current().is_intercepting()
    }

    pub fn slot(&self) -> &FetchSlot {
        &self.slot
    }
}
