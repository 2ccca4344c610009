use clap::{Parser, Subcommand, ValueEnum};
use jaydai::{
    api::InMemoryMessageApi, config::ConfigManager, error::parse_json_body, io::replay_capture,
    utils, AppConfig, ExtensionApp, JaydaiResult, PlatformAdapter, PlatformDispatcher,
    PlatformRegistry,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Jaydai インターセプト層のオフラインツール
#[derive(Parser)]
#[command(name = "jaydai", version, about = "Classify and extract AI chat traffic")]
struct Cli {
    /// 設定ファイル（省略時は XDG 設定ディレクトリ）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// URL とメソッドを分類
    Classify {
        /// 対象ホスト名（例: chatgpt.com）
        #[arg(long)]
        host: String,
        url: String,
        #[arg(long, default_value = "GET")]
        method: String,
    },
    /// 保存済みの JSON ペイロードから会話・メッセージを抽出
    Extract {
        /// プラットフォーム名（ChatGPT / Claude / Mistral / Copilot）
        #[arg(long)]
        platform: String,
        #[arg(long, value_enum)]
        kind: PayloadKind,
        /// リクエスト URL（会話 ID の抽出に使用）
        #[arg(long, default_value = "")]
        url: String,
        file: PathBuf,
    },
    /// 記録ファイルを再生してイベントを出力
    Replay {
        #[arg(long)]
        platform: String,
        file: PathBuf,
        /// 抽出結果を保存 API に送信
        #[arg(long)]
        save: bool,
    },
    /// 現在の設定を表示
    Config {
        /// 設定ファイルをデフォルト値で上書き
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PayloadKind {
    List,
    Conversation,
    Request,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    let config = config_manager.load_config().unwrap_or_else(|e| {
        eprintln!("設定読み込みエラー、デフォルト設定を使用: {:#}", e);
        AppConfig::default()
    });
    utils::init_logging(&config.log)?;

    match cli.command {
        Command::Classify { host, url, method } => classify(&host, &url, &method),
        Command::Extract {
            platform,
            kind,
            url,
            file,
        } => Ok(extract(&adapter(&platform)?, kind, &url, &file)?),
        Command::Replay {
            platform,
            file,
            save,
        } => Ok(replay(&config, adapter(&platform)?, &file, save).await?),
        Command::Config { reset } => {
            let config = if reset {
                config_manager.reset_config()?;
                AppConfig::default()
            } else {
                config
            };
            println!("# {}", config_manager.config_path().display());
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn adapter(name: &str) -> anyhow::Result<Arc<dyn PlatformAdapter>> {
    PlatformRegistry::builtin()
        .by_name(name)
        .ok_or_else(|| anyhow::anyhow!("Unknown platform: {}", name))
}

fn classify(host: &str, url: &str, method: &str) -> anyhow::Result<()> {
    let Some(adapter) = PlatformRegistry::builtin().by_hostname(host) else {
        println!("{}", json!({ "host": host, "supported": false }));
        return Ok(());
    };
    let endpoints = adapter.endpoints();
    let kind = endpoints.classify(url, method);
    println!(
        "{}",
        json!({
            "host": host,
            "supported": true,
            "platform": adapter.provider(),
            "type": kind.map(|kind| kind.type_name()),
            "conversationId": endpoints.conversation_id(url),
        })
    );
    Ok(())
}

fn extract(
    adapter: &Arc<dyn PlatformAdapter>,
    kind: PayloadKind,
    url: &str,
    file: &Path,
) -> JaydaiResult<()> {
    let body = parse_json_body(&std::fs::read(file)?)?;

    let output = match kind {
        PayloadKind::List => json!({ "chats": adapter.extract_conversation_list(&body)? }),
        PayloadKind::Conversation => {
            let conversation = adapter.extract_conversation(&body, url)?;
            let batch = adapter.extract_messages(&body, url)?;
            for skipped in &batch.skipped {
                tracing::warn!("⚠️ Skipped message: {}", skipped);
            }
            json!({ "conversation": conversation, "messages": batch.messages })
        }
        PayloadKind::Request => json!({ "message": adapter.extract_user_message(&body, url)? }),
    };

    println!("{:#}", output);
    Ok(())
}

async fn replay(
    config: &AppConfig,
    adapter: Arc<dyn PlatformAdapter>,
    file: &Path,
    save: bool,
) -> JaydaiResult<()> {
    let app = if save {
        ExtensionApp::from_config(config)?
    } else {
        ExtensionApp::with_api(config, Arc::new(InMemoryMessageApi::new()))?
    };
    let dispatcher = PlatformDispatcher::new(app.registry(), app.context().clone());

    let mut events = app.bus().subscribe();
    let summary =
        replay_capture(file, adapter, app.bus().clone(), config.interceptor_settings()).await?;

    // 再生で発行されたイベントを順に処理し、派生イベントも出力する
    let mut saves = Vec::new();
    while let Ok(event) = events.try_recv() {
        println!("{}", json!({ "event": event.name(), "detail": event.detail() }));
        if let Some(task) = dispatcher.dispatch(&event) {
            saves.push(task);
        }
    }
    for task in saves {
        if let Err(e) = task.await {
            tracing::warn!("⚠️ Save task failed: {}", e);
        }
    }

    tracing::info!(
        "✅ Replayed {} exchanges ({} classified)",
        summary.exchanges,
        summary.classified
    );
    Ok(())
}
