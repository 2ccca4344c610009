//! アプリケーション本体
//!
//! 拡張機能のランタイム全体（イベントバス、保存 API、エラー報告、
//! ディスパッチャ）を所有し、[`Application`] として初期化と後片付けを行う。

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::api::{HttpMessageApi, MessageApi};
use crate::bootstrap::Application;
use crate::config::AppConfig;
use crate::error::{ErrorReporter, JaydaiError, JaydaiResult, TracingErrorReporter};
use crate::events::EventBus;
use crate::interceptor::{FetchInterceptor, FetchSlot};
use crate::io::CaptureRecorder;
use crate::platforms::{PlatformContext, PlatformDispatcher, PlatformRegistry};

pub struct ExtensionApp {
    registry: &'static PlatformRegistry,
    ctx: PlatformContext,
    dispatcher: Mutex<Option<PlatformDispatcher>>,
    initializations: AtomicUsize,
}

impl ExtensionApp {
    pub fn new(registry: &'static PlatformRegistry, ctx: PlatformContext) -> Self {
        Self {
            registry,
            ctx,
            dispatcher: Mutex::new(None),
            initializations: AtomicUsize::new(0),
        }
    }

    /// 設定から HTTP クライアント付きで構築
    pub fn from_config(config: &AppConfig) -> JaydaiResult<Self> {
        let mut api = HttpMessageApi::new(&config.api_base_url)?;
        if let Some(token) = &config.api_token {
            api = api.with_token(token.clone());
        }
        Self::with_api(config, Arc::new(api))
    }

    /// 保存先を指定して構築（ドライラン用）
    pub fn with_api(config: &AppConfig, api: Arc<dyn MessageApi>) -> JaydaiResult<Self> {
        if config.event_bus_capacity == 0 {
            return Err(JaydaiError::Configuration(
                "event_bus_capacity must be at least 1".to_string(),
            ));
        }
        let reporter: Arc<dyn ErrorReporter> =
            TracingErrorReporter::shared(config.recent_error_capacity);
        let ctx = PlatformContext::new(EventBus::new(config.event_bus_capacity), api, reporter);
        Ok(Self::new(PlatformRegistry::builtin(), ctx))
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    pub fn context(&self) -> &PlatformContext {
        &self.ctx
    }

    pub fn registry(&self) -> &'static PlatformRegistry {
        self.registry
    }

    /// ホストに対応するインターセプタを用意（対応外なら None）
    pub fn interceptor_for(
        &self,
        hostname: &str,
        slot: FetchSlot,
        config: &AppConfig,
    ) -> Option<FetchInterceptor> {
        let adapter = self.registry.by_hostname(hostname)?;
        let mut interceptor = FetchInterceptor::new(slot, adapter, self.ctx.bus.clone())
            .with_settings(config.interceptor_settings());
        if let Some(recorder) = CaptureRecorder::from_config(&config.capture) {
            interceptor = interceptor.with_recorder(Arc::new(recorder));
        }
        Some(interceptor)
    }

    pub async fn is_running(&self) -> bool {
        self.dispatcher
            .lock()
            .await
            .as_ref()
            .is_some_and(PlatformDispatcher::is_running)
    }

    /// `initialize` が実際に購読を開始した回数
    pub fn initialization_count(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Application for ExtensionApp {
    async fn initialize(&self) -> anyhow::Result<()> {
        let mut slot = self.dispatcher.lock().await;
        if slot.as_ref().is_some_and(PlatformDispatcher::is_running) {
            tracing::debug!("Application already initialized");
            return Ok(());
        }

        let mut dispatcher = PlatformDispatcher::new(self.registry, self.ctx.clone());
        if !dispatcher.start() {
            anyhow::bail!("Platform dispatcher failed to start");
        }
        *slot = Some(dispatcher);
        self.initializations.fetch_add(1, Ordering::SeqCst);
        tracing::info!("🚀 Jaydai application initialized");
        Ok(())
    }

    fn has_cleanup(&self) -> bool {
        true
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        let dispatcher = self.dispatcher.lock().await.take();
        if let Some(mut dispatcher) = dispatcher {
            dispatcher.stop().await;
            tracing::info!("🧹 Jaydai application cleaned up");
        }
        Ok(())
    }
}
