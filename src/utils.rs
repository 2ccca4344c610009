//! ユーティリティ関数

use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;
use crate::models::Message;

/// ログ初期化
///
/// `RUST_LOG` が設定されていればそれを優先し、なければ設定のレベルを使う。
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .or_else(|_| EnvFilter::try_new("info"))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// デバッグ用のメッセージダンプ
pub fn dump_message(message: &Message, context: &str) {
    debug!(
        context = context,
        message_id = %message.message_provider_id,
        chat_id = %message.chat_provider_id,
        role = %message.role,
        model = %message.model,
        created_at = message.created_at,
        content_length = message.content.len(),
        content_preview = %message.content.chars().take(50).collect::<String>(),
        has_parent = message.parent_message_provider_id.is_some(),
        "📨 Message extracted"
    );
}
