//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリを使用した設定ファイルの永続化と管理を提供します。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::bootstrap::BootstrapConfig;
use crate::error::TracingErrorReporter;
use crate::interceptor::InterceptorSettings;
use crate::io::CaptureConfig;

/// API ベース URL を上書きする環境変数
pub const API_URL_ENV: &str = "JAYDAI_API_URL";

/// ログ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// ログレベル (trace/debug/info/warn/error)。RUST_LOG が優先
    pub log_level: String,
    /// JSON 形式で出力
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 保存 API のベース URL
    pub api_base_url: String,
    /// Bearer トークン
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// 拡張リソースのベース URL
    pub extension_base_url: String,

    /// イベントバスの容量
    pub event_bus_capacity: usize,
    /// ストリーミング中の途中経過を発行する文字数間隔（0 で無効）
    pub interim_interval: usize,
    /// 保持する直近エラー数
    pub recent_error_capacity: usize,

    /// 傍受内容の記録設定
    pub capture: CaptureConfig,

    /// ログ設定
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            api_token: None,
            extension_base_url: BootstrapConfig::default().resource_base_url,
            event_bus_capacity: 256,
            interim_interval: InterceptorSettings::default().interim_interval,
            recent_error_capacity: TracingErrorReporter::DEFAULT_CAPACITY,
            capture: CaptureConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 環境変数による上書きを適用
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                debug!("API base URL overridden by {}", API_URL_ENV);
                self.api_base_url = url.trim().to_string();
            }
        }
    }

    pub fn interceptor_settings(&self) -> InterceptorSettings {
        InterceptorSettings {
            interim_interval: self.interim_interval,
        }
    }

    pub fn bootstrap_config(&self) -> BootstrapConfig {
        BootstrapConfig::new(self.extension_base_url.clone())
    }
}

/// 設定管理マネージャー
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// XDG 設定ディレクトリを使う設定マネージャーを作成
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_config_path()?)
    }

    /// 任意のパスを使う設定マネージャーを作成
    pub fn with_path(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();

        // 設定ディレクトリを作成（存在しない場合）
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        Ok(Self { config_path })
    }

    fn default_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("ai", "jaydai", "jaydai")
            .context("Failed to get project directories")?;

        let config_file = project_dirs.config_dir().join("config.toml");
        debug!("Config file path: {}", config_file.display());

        Ok(config_file)
    }

    /// 設定を読み込み（環境変数の上書きを含む）
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = if self.config_exists() {
            let config_content = fs::read_to_string(&self.config_path).with_context(|| {
                format!("Failed to read config file: {}", self.config_path.display())
            })?;

            let config: AppConfig = toml::from_str(&config_content).with_context(|| {
                format!(
                    "Failed to parse config file: {}",
                    self.config_path.display()
                )
            })?;

            info!(
                "✅ Configuration loaded from: {}",
                self.config_path.display()
            );
            config
        } else {
            info!(
                "Config file not found, using default settings: {}",
                self.config_path.display()
            );
            AppConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        let config_content =
            toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.config_path, config_content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;

        info!("💾 Configuration saved to: {}", self.config_path.display());
        Ok(())
    }

    /// 設定をリセット（デフォルト値に戻す）
    pub fn reset_config(&self) -> Result<()> {
        self.save_config(&AppConfig::default())?;
        info!("🔄 Configuration reset to defaults");
        Ok(())
    }

    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("nested/config.toml")).unwrap();

        assert!(!manager.config_exists());
        let config = manager.load_config().unwrap();
        assert_eq!(config.event_bus_capacity, 256);
        assert_eq!(config.interim_interval, 500);
        assert!(!config.capture.enabled);
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("config.toml")).unwrap();

        let mut config = AppConfig::default();
        config.extension_base_url = "chrome-extension://abcdef".to_string();
        config.capture.enabled = true;
        config.log.log_level = "debug".to_string();
        manager.save_config(&config).unwrap();

        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded.extension_base_url, "chrome-extension://abcdef");
        assert!(loaded.capture.enabled);
        assert_eq!(loaded.log.log_level, "debug");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "interim_interval = 0\n\n[capture]\nenabled = true\n").unwrap();

        let config = ConfigManager::with_path(&path).unwrap().load_config().unwrap();
        assert!(config.capture.enabled);
        assert_eq!(config.capture.file_path, "jaydai_capture.ndjson");
        assert_eq!(config.interceptor_settings().interim_interval, 0);
        assert_eq!(config.recent_error_capacity, 20);
    }

    #[test]
    fn test_reset_overwrites_saved_values() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("config.toml")).unwrap();

        let mut config = AppConfig::default();
        config.event_bus_capacity = 8;
        manager.save_config(&config).unwrap();
        manager.reset_config().unwrap();

        assert!(manager.config_exists());
        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded.event_bus_capacity, 256);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "event_bus_capacity = \"many\"").unwrap();

        assert!(ConfigManager::with_path(&path).unwrap().load_config().is_err());
    }
}
