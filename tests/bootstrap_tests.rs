//! ブートストラップとライフサイクルの統合テスト

use async_trait::async_trait;
use jaydai::api::InMemoryMessageApi;
use jaydai::bootstrap::{
    Application, Bootstrap, BootstrapConfig, BootstrapError, InProcessPage, InjectionTarget,
    ModuleScript, PageHost,
};
use jaydai::interceptor::{Fetch, FetchInterceptor, FetchRequest, FetchResponse, FetchSlot};
use jaydai::platforms::{ChatGptAdapter, PlatformContext, PlatformRegistry};
use jaydai::{AppConfig, ErrorCode, EventBus, ExtensionApp, JaydaiEvent, TracingErrorReporter};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// 呼び出し履歴を記録するアプリケーション
#[derive(Default)]
struct RecordingApp {
    log: Mutex<Vec<&'static str>>,
    with_cleanup: bool,
    fail_initialize: bool,
}

impl RecordingApp {
    fn with_cleanup() -> Arc<Self> {
        Arc::new(Self {
            with_cleanup: true,
            ..Default::default()
        })
    }

    fn log(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Application for RecordingApp {
    async fn initialize(&self) -> anyhow::Result<()> {
        self.log.lock().push("initialize");
        if self.fail_initialize {
            anyhow::bail!("services unavailable");
        }
        Ok(())
    }

    fn has_cleanup(&self) -> bool {
        self.with_cleanup
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        self.log.lock().push("cleanup");
        Ok(())
    }
}

fn bootstrap() -> (Bootstrap, Arc<TracingErrorReporter>) {
    let reporter = TracingErrorReporter::shared(20);
    let bootstrap = Bootstrap::new(
        BootstrapConfig::new("chrome-extension://jaydai-test"),
        PlatformRegistry::builtin(),
        reporter.clone(),
    );
    (bootstrap, reporter)
}

#[tokio::test]
async fn test_unsupported_host_has_no_side_effects() {
    let (bootstrap, reporter) = bootstrap();
    let page = InProcessPage::new("www.example.com");
    let app = RecordingApp::with_cleanup();

    assert!(bootstrap.run(&page, app.clone()).is_none());
    assert!(page.scripts().is_empty());
    assert!(app.log().is_empty());
    assert!(reporter.recent_errors().is_empty());
}

#[test]
fn test_run_outside_runtime_is_reported() {
    let (bootstrap, reporter) = bootstrap();
    let page = InProcessPage::new("chatgpt.com");
    let app = RecordingApp::with_cleanup();

    assert!(bootstrap.run(&page, app.clone()).is_none());
    assert!(page.scripts().is_empty());
    assert!(app.log().is_empty());
    assert_eq!(reporter.count_by_code(ErrorCode::ExtensionError), 1);
}

#[tokio::test]
async fn test_script_goes_to_first_available_target() {
    let (bootstrap, _) = bootstrap();

    let page = InProcessPage::new("chatgpt.com");
    let handle = bootstrap.run(&page, RecordingApp::with_cleanup()).unwrap();
    assert_eq!(handle.injected_into(), Some(InjectionTarget::Head));

    let scripts = page.scripts();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].1.id, "jaydai:network-interceptor");
    assert_eq!(
        scripts[0].1.src,
        "chrome-extension://jaydai-test/networkInterceptor.js"
    );
    handle.shutdown().await;

    let body_only = InProcessPage::new("claude.ai").with_targets(&[InjectionTarget::Body]);
    let handle = bootstrap.run(&body_only, RecordingApp::with_cleanup()).unwrap();
    assert_eq!(handle.injected_into(), Some(InjectionTarget::Body));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_injection_failure_is_reported_not_raised() {
    let (bootstrap, reporter) = bootstrap();
    let page = InProcessPage::new("chat.mistral.ai").with_targets(&[]);
    let app = RecordingApp::with_cleanup();

    let handle = bootstrap.run(&page, app.clone()).unwrap();
    assert_eq!(handle.injected_into(), None);
    assert_eq!(reporter.count_by_code(ErrorCode::ExtensionError), 1);

    // アプリケーションの初期化は独立して進む
    handle.dom_content_loaded().unwrap();
    handle.shutdown().await;
    assert_eq!(app.log(), vec!["initialize"]);
}

#[tokio::test]
async fn test_append_error_is_reported() {
    struct BrokenPage;

    impl PageHost for BrokenPage {
        fn hostname(&self) -> String {
            "copilot.microsoft.com".to_string()
        }

        fn has_target(&self, _target: InjectionTarget) -> bool {
            true
        }

        fn append_script(
            &self,
            target: InjectionTarget,
            _script: &ModuleScript,
        ) -> Result<(), BootstrapError> {
            Err(BootstrapError::Injection {
                target,
                reason: "blocked by CSP".to_string(),
            })
        }
    }

    let (bootstrap, reporter) = bootstrap();
    assert!(matches!(
        bootstrap.inject(&BrokenPage),
        Err(BootstrapError::Injection {
            target: InjectionTarget::Head,
            ..
        })
    ));

    let handle = bootstrap
        .run(&BrokenPage, RecordingApp::with_cleanup())
        .unwrap();
    assert!(handle.injected_into().is_none());
    assert_eq!(reporter.count_by_code(ErrorCode::ExtensionError), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_order() {
    let (bootstrap, _) = bootstrap();
    let page = InProcessPage::new("chatgpt.com");
    let app = RecordingApp::with_cleanup();

    let handle = bootstrap.run(&page, app.clone()).unwrap();
    handle.reinitialize().unwrap(); // ロード前は無視
    handle.dom_content_loaded().unwrap();
    handle.dom_content_loaded().unwrap(); // 二度目は無視
    handle.reinitialize().unwrap();
    handle.before_unload().unwrap();
    handle.shutdown().await;

    assert_eq!(
        app.log(),
        vec!["initialize", "cleanup", "initialize", "cleanup"]
    );
}

#[tokio::test]
async fn test_signals_after_unload_are_rejected() {
    let (bootstrap, _) = bootstrap();
    let page = InProcessPage::new("chatgpt.com");
    let handle = bootstrap.run(&page, RecordingApp::with_cleanup()).unwrap();

    handle.before_unload().unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("lifecycle task did not stop");

    assert!(matches!(
        handle.reinitialize(),
        Err(BootstrapError::LifecycleClosed)
    ));
}

#[tokio::test]
async fn test_app_without_cleanup_ignores_reinitialize() {
    let (bootstrap, _) = bootstrap();
    let page = InProcessPage::new("claude.ai");
    let app = Arc::new(RecordingApp::default());

    let handle = bootstrap.run(&page, app.clone()).unwrap();
    handle.dom_content_loaded().unwrap();
    handle.reinitialize().unwrap();
    handle.before_unload().unwrap();
    handle.shutdown().await;

    assert_eq!(app.log(), vec!["initialize"]);
}

#[tokio::test]
async fn test_initialize_failure_is_reported() {
    let (bootstrap, reporter) = bootstrap();
    let page = InProcessPage::new("chatgpt.com").with_dom_ready(true);
    let app = Arc::new(RecordingApp {
        fail_initialize: true,
        ..Default::default()
    });

    // 既にロード済みのページでは即座に初期化される
    let handle = bootstrap.run(&page, app.clone()).unwrap();
    handle.shutdown().await;

    assert_eq!(app.log(), vec!["initialize"]);
    let errors = reporter.recent_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::ExtensionError);
}

struct StaticFetch;

#[async_trait]
impl Fetch for StaticFetch {
    async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse, jaydai::interceptor::FetchError> {
        Ok(FetchResponse::json(
            200,
            &json!({
                "conversation_id": "c1",
                "mapping": {
                    "n1": {"message": {"id": "n1", "author": {"role": "user"},
                           "content": {"content_type": "text", "parts": ["hi"]}}}
                }
            }),
        ))
    }
}

#[tokio::test]
async fn test_full_page_flow_with_reinitialize() {
    let bus = EventBus::default();
    let api = Arc::new(InMemoryMessageApi::new());
    let reporter = TracingErrorReporter::shared(20);
    let ctx = PlatformContext::new(bus.clone(), api.clone(), reporter.clone());
    let app = Arc::new(ExtensionApp::new(PlatformRegistry::builtin(), ctx));

    let slot = FetchSlot::new(Arc::new(StaticFetch));
    let interceptor = FetchInterceptor::new(slot.clone(), Arc::new(ChatGptAdapter::new()), bus.clone());
    let page = InProcessPage::new("chatgpt.com").with_interceptor(interceptor);

    let (bootstrap, _) = bootstrap();
    let handle = bootstrap.run(&page, app.clone()).unwrap();
    assert!(page.interceptor().unwrap().is_installed());

    handle.dom_content_loaded().unwrap();
    handle.reinitialize().unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while app.initialization_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("application was not reinitialized");

    // 再初期化後も購読は一つだけ
    assert_eq!(bus.subscriber_count(), 1);

    let mut rx = bus.subscribe();
    slot.fetch(FetchRequest::get("https://chatgpt.com/backend-api/conversation/c1"))
        .await
        .unwrap();

    let loaded = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(JaydaiEvent::ConversationLoaded { messages, .. }) = rx.recv().await {
                break messages;
            }
        }
    })
    .await
    .expect("conversation was not loaded");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].content, "hi");

    handle.before_unload().unwrap();
    handle.shutdown().await;
    assert!(!app.is_running().await);
}

#[test]
fn test_resource_urls_follow_config() {
    let config = BootstrapConfig::new("chrome-extension://abc");
    tokio_test::assert_ok!(config
        .resource_url("networkInterceptor.js")
        .parse::<url::Url>());
}

#[tokio::test]
async fn test_page_wired_from_config() {
    let config = AppConfig {
        extension_base_url: "chrome-extension://from-config".to_string(),
        ..AppConfig::default()
    };
    let api = Arc::new(InMemoryMessageApi::new());
    let app = Arc::new(ExtensionApp::with_api(&config, api.clone()).unwrap());

    let slot = FetchSlot::new(Arc::new(StaticFetch));
    assert!(app
        .interceptor_for("www.example.com", slot.clone(), &config)
        .is_none());
    let interceptor = app.interceptor_for("chatgpt.com", slot.clone(), &config).unwrap();
    let page = InProcessPage::new("chatgpt.com")
        .with_dom_ready(true)
        .with_interceptor(interceptor);

    let reporter = TracingErrorReporter::shared(config.recent_error_capacity);
    let bootstrap = Bootstrap::new(config.bootstrap_config(), app.registry(), reporter.clone());
    let handle = bootstrap.run(&page, app.clone()).unwrap();
    assert_eq!(
        page.scripts()[0].1.src,
        "chrome-extension://from-config/networkInterceptor.js"
    );

    tokio::time::timeout(Duration::from_secs(1), async {
        while !app.is_running().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("application did not start");

    slot.fetch(FetchRequest::get("https://chatgpt.com/backend-api/conversation/c1"))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while api.messages().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("conversation was not saved");
    assert_eq!(api.calls(), vec!["save_chat", "save_message_batch"]);

    handle.before_unload().unwrap();
    handle.shutdown().await;
    assert!(reporter.recent_errors().is_empty());
}
