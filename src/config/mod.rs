//! # 配置管理模块
//!
//! 处理应用配置加载、验证和热重载

mod app_config;
mod manager;
mod watcher;

pub use app_config::{
    AppConfig, ChannelConfig, NotifyConfig, RelayConfig, RootNotifyConfig, ServerConfig,
    WorkerConfig,
};
pub use manager::ConfigManager;
pub use watcher::{ConfigEvent, ConfigWatcher};

use std::env;
use std::path::{Path, PathBuf};

/// 默认配置文件路径：`API_RELAY_CONFIG_PATH` 优先，否则 `config/config.{RUST_ENV}.toml`
pub fn default_config_path() -> PathBuf {
    env::var("API_RELAY_CONFIG_PATH").map_or_else(
        |_| {
            let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
            PathBuf::from(format!("config/config.{env}.toml"))
        },
        PathBuf::from,
    )
}

/// 从文件加载并验证配置
pub fn load_config_from_file(path: &Path) -> crate::error::Result<AppConfig> {
    if !path.exists() {
        return Err(crate::error::RelayError::config(format!(
            "配置文件不存在: {}",
            path.display()
        )));
    }

    let config_content = std::fs::read_to_string(path).map_err(|e| {
        crate::error::RelayError::config_with_source(
            format!("读取配置文件失败: {}", path.display()),
            e,
        )
    })?;

    let config: AppConfig = toml::from_str(&config_content).map_err(|e| {
        crate::error::RelayError::config_with_source(
            format!("TOML解析失败 - 配置文件: {}", path.display()),
            e,
        )
    })?;

    validate_config(&config)?;

    Ok(config)
}

/// 验证配置有效性
pub fn validate_config(config: &AppConfig) -> crate::error::Result<()> {
    config.validate().map_err(crate::error::RelayError::config)
}
