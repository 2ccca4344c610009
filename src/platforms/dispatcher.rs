//! インターセプトイベントをアダプタへ振り分けるタスク

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::StreamExt;

use super::{PlatformContext, PlatformRegistry, SaveTask};
use crate::events::{InterceptData, InterceptKind, JaydaiEvent};

pub struct PlatformDispatcher {
    registry: &'static PlatformRegistry,
    ctx: PlatformContext,
    shutdown_sender: Option<mpsc::UnboundedSender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PlatformDispatcher {
    pub fn new(registry: &'static PlatformRegistry, ctx: PlatformContext) -> Self {
        Self {
            registry,
            ctx,
            shutdown_sender: None,
            task: None,
        }
    }

    pub fn context(&self) -> &PlatformContext {
        &self.ctx
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// 購読を開始（既に動作中、またはランタイム外なら false）
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            tracing::debug!("Dispatcher already running");
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("❌ Dispatcher needs a tokio runtime: {}", e);
                return false;
            }
        };

        // 購読は spawn 前に確立し、直後の publish を取りこぼさない
        let mut events = self.ctx.bus.subscribe_stream();
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
        let registry = self.registry;
        let ctx = self.ctx.clone();

        self.shutdown_sender = Some(shutdown_tx);
        self.task = Some(runtime.spawn(async move {
            tracing::info!("📡 Platform dispatcher started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    received = events.next() => match received {
                        Some(Ok(event)) => {
                            Self::dispatch_with(registry, &ctx, &event);
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                            tracing::warn!("⚠️ Dispatcher lagged, {} events skipped", skipped);
                        }
                        None => break,
                    },
                }
            }
            tracing::info!("🛑 Platform dispatcher stopped");
        }));
        true
    }

    /// 購読を停止し、タスクの終了を待つ
    pub async fn stop(&mut self) {
        if let Some(sender) = self.shutdown_sender.take() {
            let _ = sender.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("⚠️ Dispatcher task ended abnormally: {}", e);
            }
        }
    }

    /// 一つのイベントを処理（保存タスクがあれば返す）
    pub fn dispatch(&self, event: &JaydaiEvent) -> Option<SaveTask> {
        Self::dispatch_with(self.registry, &self.ctx, event)
    }

    fn dispatch_with(
        registry: &PlatformRegistry,
        ctx: &PlatformContext,
        event: &JaydaiEvent,
    ) -> Option<SaveTask> {
        let traffic = event.as_intercepted()?;
        let Some(adapter) = registry.by_provider(traffic.platform) else {
            tracing::debug!("No adapter for {}", traffic.platform);
            return None;
        };

        match (traffic.kind, &traffic.data) {
            (InterceptKind::ConversationList, InterceptData::Exchange { response_body, .. }) => {
                adapter.handle_conversation_list(ctx, response_body)
            }
            (
                InterceptKind::SpecificConversation,
                InterceptData::Exchange {
                    url, response_body, ..
                },
            ) => adapter.handle_specific_conversation(ctx, url, response_body),
            (InterceptKind::ChatCompletion, InterceptData::ChatCompletion { url, request_body }) => {
                adapter.handle_chat_completion(ctx, url, request_body.as_ref());
                None
            }
            (InterceptKind::AssistantResponse, InterceptData::AssistantResponse(response)) => {
                adapter.handle_assistant_response(ctx, response);
                None
            }
            (InterceptKind::UserInfo, _) => {
                tracing::trace!("👤 User info intercepted for {}", traffic.platform);
                None
            }
            (kind, _) => {
                tracing::debug!("Unexpected payload shape for {:?}", kind);
                None
            }
        }
    }
}

impl Drop for PlatformDispatcher {
    fn drop(&mut self) {
        if let Some(sender) = self.shutdown_sender.take() {
            let _ = sender.send(());
        }
    }
}
