//! 傍受したやり取りの記録と再生
//!
//! 分類済みのリクエスト/レスポンスを NDJSON で保存し、後から新しい
//! インターセプタに流し直して同じイベントを再現する。

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ndjson::{append_ndjson_line, count_entries, parse_ndjson_file, CaptureError};
use crate::events::EventBus;
use crate::interceptor::{
    Fetch, FetchError, FetchRequest, FetchResponse, InterceptingFetch, InterceptorSettings,
};
use crate::platforms::PlatformAdapter;

/// 記録設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 記録を有効にするか
    pub enabled: bool,
    /// 保存先ファイルパス
    pub file_path: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file_path: "jaydai_capture.ndjson".to_string(),
        }
    }
}

/// 一件のやり取り
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedExchange {
    /// 記録時刻（エポックミリ秒）
    pub timestamp: i64,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub request_body: Option<Value>,
    pub status: u16,
    #[serde(default)]
    pub content_type: Option<String>,
    pub response_body: String,
}

impl CapturedExchange {
    pub fn to_request(&self) -> FetchRequest {
        let request = FetchRequest::new(self.method.clone(), self.url.clone());
        match &self.request_body {
            Some(body) => request
                .with_header("content-type", "application/json")
                .with_body(body.to_string().into_bytes()),
            None => request,
        }
    }

    pub fn to_response(&self) -> FetchResponse {
        let response = FetchResponse::new(self.status, self.response_body.clone().into_bytes());
        match &self.content_type {
            Some(content_type) => response.with_header("content-type", content_type.clone()),
            None => response,
        }
    }
}

/// NDJSON への追記
#[derive(Debug)]
pub struct CaptureRecorder {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl CaptureRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 無効な設定なら `None`
    pub fn from_config(config: &CaptureConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.file_path.clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 一件追記（書き込みは直列化される）
    pub async fn record(&self, exchange: &CapturedExchange) -> Result<(), CaptureError> {
        let _guard = self.write_lock.lock().await;
        append_ndjson_line(&self.path, exchange).await?;
        tracing::debug!("💾 Captured {} {}", exchange.method, exchange.url);
        Ok(())
    }

    /// 記録済みの件数
    pub fn recorded_count(&self) -> Result<usize, CaptureError> {
        count_entries(&self.path)
    }
}

/// 記録ファイルを読み込む
pub fn load_capture(path: &Path) -> Result<Vec<CapturedExchange>, CaptureError> {
    parse_ndjson_file(path, |entry: &CapturedExchange| {
        if entry.url.is_empty() {
            Err("Empty URL".to_string())
        } else {
            Ok(())
        }
    })
}

/// 記録済みの応答を返す fetch
pub struct ReplayFetch {
    exchanges: Mutex<VecDeque<CapturedExchange>>,
}

impl ReplayFetch {
    pub fn new(exchanges: Vec<CapturedExchange>) -> Self {
        Self {
            exchanges: Mutex::new(exchanges.into()),
        }
    }
}

#[async_trait]
impl Fetch for ReplayFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut exchanges = self.exchanges.lock();
        let position = exchanges
            .iter()
            .position(|e| e.url == request.url && e.method.eq_ignore_ascii_case(&request.method));
        match position.and_then(|index| exchanges.remove(index)) {
            Some(exchange) => Ok(exchange.to_response()),
            None => Ok(FetchResponse::new(404, Vec::new())),
        }
    }
}

/// 再生結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub exchanges: usize,
    pub classified: usize,
}

/// 記録を新しいインターセプタに流し直す
///
/// 各応答はバッファ済みのため、イベントは `fetch` の完了までに発行される。
pub async fn replay_capture(
    path: &Path,
    adapter: Arc<dyn PlatformAdapter>,
    bus: EventBus,
    settings: InterceptorSettings,
) -> Result<ReplaySummary, CaptureError> {
    let exchanges = load_capture(path)?;
    tracing::info!("▶️ Replaying {} exchanges from {}", exchanges.len(), path.display());

    let mut summary = ReplaySummary::default();
    let requests: Vec<FetchRequest> = exchanges.iter().map(CapturedExchange::to_request).collect();
    for request in &requests {
        if adapter
            .endpoints()
            .classify(&request.url, &request.method)
            .is_some()
        {
            summary.classified += 1;
        }
    }

    let replay: Arc<dyn Fetch> = Arc::new(ReplayFetch::new(exchanges));
    let fetch = InterceptingFetch::new(replay, adapter, bus, settings);

    for request in requests {
        let response = fetch
            .fetch(request)
            .await
            .map_err(|e| CaptureError::Replay(e.to_string()))?;
        response
            .bytes()
            .await
            .map_err(|e| CaptureError::Replay(e.to_string()))?;
        summary.exchanges += 1;
    }

    Ok(summary)
}
