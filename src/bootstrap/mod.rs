//! ページへのインターセプタ注入とアプリケーションのライフサイクル
//!
//! - 対応ホストでなければ何もしない
//! - インターセプタ用のモジュールスクリプトを即座に注入
//! - DOMContentLoaded でアプリケーションを初期化し、beforeunload と
//!   reinitialize で後片付け（reinitialize は cleanup → initialize）
//!
//! ここでの失敗はすべてログと [`ErrorReporter`] に流し、呼び出し元には返さない。

pub mod page;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AppError, ErrorReporter};
use crate::platforms::PlatformRegistry;

pub use page::InProcessPage;

/// インターセプタスクリプトの要素 ID
pub const INTERCEPTOR_SCRIPT_ID: &str = "jaydai:network-interceptor";
/// インターセプタバンドルのリソースパス
pub const INTERCEPTOR_BUNDLE: &str = "networkInterceptor.js";
/// アプリケーションモジュールのリソースパス
pub const APPLICATION_MODULE: &str = "applicationInitializer.js";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("No target element available for script injection")]
    NoInjectionTarget,

    #[error("Failed to append script to {target}: {reason}")]
    Injection {
        target: InjectionTarget,
        reason: String,
    },

    #[error("Application initialization failed: {0}")]
    Initialize(String),

    #[error("Application cleanup failed: {0}")]
    Cleanup(String),

    #[error("Lifecycle task is no longer running")]
    LifecycleClosed,

    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

/// スクリプトの追加先（優先順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum InjectionTarget {
    #[display("head")]
    Head,
    #[display("documentElement")]
    DocumentElement,
    #[display("body")]
    Body,
}

impl InjectionTarget {
    pub const PREFERENCE: [InjectionTarget; 3] = [
        InjectionTarget::Head,
        InjectionTarget::DocumentElement,
        InjectionTarget::Body,
    ];
}

/// `<script type="module">` 相当
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleScript {
    pub id: String,
    pub src: String,
}

impl ModuleScript {
    pub fn new(id: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            src: src.into(),
        }
    }

    pub fn is_interceptor(&self) -> bool {
        self.id == INTERCEPTOR_SCRIPT_ID
    }
}

/// 注入先のページ
pub trait PageHost: Send + Sync {
    fn hostname(&self) -> String;

    /// 呼び出し時点で要素が存在するか
    fn has_target(&self, target: InjectionTarget) -> bool;

    fn append_script(
        &self,
        target: InjectionTarget,
        script: &ModuleScript,
    ) -> Result<(), BootstrapError>;

    /// DOMContentLoaded が既に発火済みか
    fn is_dom_ready(&self) -> bool {
        false
    }
}

/// 遅延初期化されるアプリケーション本体
#[async_trait]
pub trait Application: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<()>;

    /// `cleanup` を提供するか（提供しない場合は unload/reinitialize を購読しない）
    fn has_cleanup(&self) -> bool {
        false
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// ライフサイクルタスクへ届けるシグナル
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum LifecycleSignal {
    #[display("DOMContentLoaded")]
    DomContentLoaded,
    #[display("beforeunload")]
    BeforeUnload,
    #[display("reinitialize")]
    Reinitialize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// 拡張リソースのベース URL（`chrome-extension://<id>` 相当）
    pub resource_base_url: String,
}

impl BootstrapConfig {
    pub fn new(resource_base_url: impl Into<String>) -> Self {
        Self {
            resource_base_url: resource_base_url.into(),
        }
    }

    pub fn resource_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.resource_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn interceptor_script(&self) -> ModuleScript {
        ModuleScript::new(INTERCEPTOR_SCRIPT_ID, self.resource_url(INTERCEPTOR_BUNDLE))
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::new("chrome-extension://jaydai")
    }
}

/// 起動済みブートストラップへのハンドル
pub struct BootstrapHandle {
    signals: mpsc::UnboundedSender<LifecycleSignal>,
    task: JoinHandle<()>,
    injected: Option<InjectionTarget>,
}

impl BootstrapHandle {
    /// インターセプタを注入した要素（失敗時は None）
    pub fn injected_into(&self) -> Option<InjectionTarget> {
        self.injected
    }

    pub fn signal(&self, signal: LifecycleSignal) -> Result<(), BootstrapError> {
        self.signals
            .send(signal)
            .map_err(|_| BootstrapError::LifecycleClosed)
    }

    pub fn dom_content_loaded(&self) -> Result<(), BootstrapError> {
        self.signal(LifecycleSignal::DomContentLoaded)
    }

    pub fn before_unload(&self) -> Result<(), BootstrapError> {
        self.signal(LifecycleSignal::BeforeUnload)
    }

    pub fn reinitialize(&self) -> Result<(), BootstrapError> {
        self.signal(LifecycleSignal::Reinitialize)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 送信側を閉じ、処理待ちのシグナルを捌き切ってから終了を待つ
    pub async fn shutdown(self) {
        drop(self.signals);
        if let Err(e) = self.task.await {
            tracing::warn!("⚠️ Lifecycle task ended abnormally: {}", e);
        }
    }
}

pub struct Bootstrap {
    config: BootstrapConfig,
    registry: &'static PlatformRegistry,
    reporter: Arc<dyn ErrorReporter>,
}

impl Bootstrap {
    pub fn new(
        config: BootstrapConfig,
        registry: &'static PlatformRegistry,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            config,
            registry,
            reporter,
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// 最初に存在する要素へインターセプタスクリプトを追加
    pub fn inject(&self, page: &dyn PageHost) -> Result<InjectionTarget, BootstrapError> {
        let target = InjectionTarget::PREFERENCE
            .into_iter()
            .find(|target| page.has_target(*target))
            .ok_or(BootstrapError::NoInjectionTarget)?;

        let script = self.config.interceptor_script();
        page.append_script(target, &script)?;
        tracing::info!("💉 Injected {} into <{}>", script.src, target);
        Ok(target)
    }

    /// ブートストラップを実行
    ///
    /// 対応外のホストでは副作用なしに `None` を返す。tokio ランタイム外で
    /// 呼ばれた場合も注入せずに EXTENSION_ERROR を報告して `None`。
    pub fn run(&self, page: &dyn PageHost, app: Arc<dyn Application>) -> Option<BootstrapHandle> {
        let hostname = page.hostname();
        if !self.registry.is_supported_host(&hostname) {
            tracing::debug!("Unsupported host '{}', skipping bootstrap", hostname);
            return None;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = BootstrapError::NoRuntime(e.to_string());
                tracing::error!("❌ Cannot start lifecycle: {}", error);
                self.reporter
                    .capture_error(AppError::extension("Failed to start bootstrap", error));
                return None;
            }
        };

        let injected = match self.inject(page) {
            Ok(target) => Some(target),
            Err(e) => {
                tracing::error!("❌ Error injecting interceptor: {}", e);
                self.reporter
                    .capture_error(AppError::extension("Failed to inject interceptor", &e));
                None
            }
        };

        let (signals, receiver) = mpsc::unbounded_channel();
        let ready = page.is_dom_ready();
        let task = runtime.spawn(lifecycle_loop(receiver, app, self.reporter.clone()));

        let handle = BootstrapHandle {
            signals,
            task,
            injected,
        };
        if ready {
            // 既にロード済みのページではイベントが来ないため即座に初期化
            let _ = handle.dom_content_loaded();
        }
        Some(handle)
    }
}

async fn lifecycle_loop(
    mut receiver: mpsc::UnboundedReceiver<LifecycleSignal>,
    app: Arc<dyn Application>,
    reporter: Arc<dyn ErrorReporter>,
) {
    let mut loaded = false;

    while let Some(signal) = receiver.recv().await {
        tracing::debug!("🔔 Lifecycle signal: {}", signal);
        match signal {
            LifecycleSignal::DomContentLoaded => {
                if loaded {
                    continue;
                }
                loaded = true;
                initialize(app.as_ref(), reporter.as_ref(), "initialization").await;
            }
            LifecycleSignal::BeforeUnload => {
                if loaded && app.has_cleanup() {
                    cleanup(app.as_ref(), reporter.as_ref()).await;
                }
                break;
            }
            LifecycleSignal::Reinitialize => {
                if !loaded || !app.has_cleanup() {
                    tracing::debug!("Reinitialize ignored before load or without cleanup");
                    continue;
                }
                cleanup(app.as_ref(), reporter.as_ref()).await;
                initialize(app.as_ref(), reporter.as_ref(), "reinitialization").await;
            }
        }
    }

    tracing::debug!("Lifecycle loop finished");
}

async fn initialize(app: &dyn Application, reporter: &dyn ErrorReporter, phase: &str) {
    match app.initialize().await {
        Ok(()) => tracing::info!("🚀 Application {} complete", phase),
        Err(e) => {
            let error = BootstrapError::Initialize(format!("{:#}", e));
            tracing::error!("❌ Error during {}: {}", phase, error);
            reporter.capture_error(AppError::extension(format!("Error during {}", phase), error));
        }
    }
}

async fn cleanup(app: &dyn Application, reporter: &dyn ErrorReporter) {
    if let Err(e) = app.cleanup().await {
        let error = BootstrapError::Cleanup(format!("{:#}", e));
        tracing::error!("❌ {}", error);
        reporter.capture_error(AppError::extension("Error during cleanup", error));
    }
}
