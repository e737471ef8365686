//! # 配置管理器
//!
//! 统一的配置管理接口，支持热重载和环境变量覆盖

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{AppConfig, ConfigEvent, ConfigWatcher, load_config_from_file, validate_config};
use crate::error::RelayError;

/// 环境变量覆盖前缀，例如 `RELAY_SERVER_PORT` -> `server.port`
const ENV_OVERRIDE_PREFIX: &str = "RELAY_";

/// 配置管理器
///
/// 持有当前生效配置的快照；请求处理通过 [`ConfigManager::current`] 获取只读副本。
pub struct ConfigManager {
    /// 配置监控器
    watcher: Option<ConfigWatcher>,
    /// 当前配置
    config: Arc<RwLock<Arc<AppConfig>>>,
    /// 环境变量覆盖映射
    env_overrides: HashMap<String, String>,
}

impl ConfigManager {
    /// 使用默认路径创建配置管理器
    pub fn new() -> crate::error::Result<Self> {
        Self::from_file(super::default_config_path(), true)
    }

    /// 从指定文件创建配置管理器
    ///
    /// `watch` 为真时需在 tokio 运行时内调用。
    pub fn from_file(config_path: impl AsRef<Path>, watch: bool) -> crate::error::Result<Self> {
        let config_path = config_path.as_ref();
        let env_overrides = Self::build_env_overrides();
        Self::build(config_path, env_overrides, watch)
    }

    /// 直接使用内存配置（测试与嵌入场景）
    pub fn from_config(config: AppConfig) -> crate::error::Result<Self> {
        validate_config(&config)?;
        Ok(Self {
            watcher: None,
            config: Arc::new(RwLock::new(Arc::new(config))),
            env_overrides: HashMap::new(),
        })
    }

    fn build(
        config_path: &Path,
        env_overrides: HashMap<String, String>,
        watch: bool,
    ) -> crate::error::Result<Self> {
        let mut config = load_config_from_file(config_path)?;
        Self::apply_env_overrides(&mut config, &env_overrides)?;
        validate_config(&config)?;

        let config = Arc::new(RwLock::new(Arc::new(config)));
        let watch = watch && env::var("API_RELAY_DISABLE_CONFIG_WATCH").unwrap_or_default() != "true";

        let watcher = if watch {
            match ConfigWatcher::new(config_path) {
                Ok(watcher) => {
                    Self::spawn_reload_listener(watcher.subscribe(), &config, env_overrides.clone());
                    Some(watcher)
                }
                Err(e) => {
                    warn!(component = "config.manager", error = %e, "无法启动配置文件监控，将禁用热重载功能");
                    None
                }
            }
        } else {
            None
        };

        info!(
            component = "config.manager",
            hot_reload = watcher.is_some(),
            env_overrides = env_overrides.len(),
            "配置管理器初始化完成"
        );

        Ok(Self {
            watcher,
            config,
            env_overrides,
        })
    }

    fn spawn_reload_listener(
        mut event_receiver: broadcast::Receiver<ConfigEvent>,
        config: &Arc<RwLock<Arc<AppConfig>>>,
        env_overrides: HashMap<String, String>,
    ) {
        let config = Arc::clone(config);
        tokio::spawn(async move {
            while let Ok(event) = event_receiver.recv().await {
                match event {
                    ConfigEvent::Reloaded(new_config) => {
                        let mut final_config = (*new_config).clone();
                        let applied = Self::apply_env_overrides(&mut final_config, &env_overrides)
                            .and_then(|()| validate_config(&final_config));
                        match applied {
                            Ok(()) => {
                                if let Ok(mut guard) = config.write() {
                                    *guard = Arc::new(final_config);
                                    info!(component = "config.manager", "配置热重载并应用环境变量覆盖完成");
                                }
                            }
                            Err(e) => warn!(component = "config.manager", error = %e, "应用环境变量覆盖失败"),
                        }
                    }
                    ConfigEvent::ReloadFailed(error) => {
                        warn!(component = "config.manager", %error, "配置重载失败");
                    }
                    ConfigEvent::FileDeleted => {
                        warn!(component = "config.manager", "配置文件被删除，保留当前配置");
                    }
                }
            }
        });
    }

    /// 获取当前配置快照
    pub fn current(&self) -> Arc<AppConfig> {
        self.config
            .read()
            .map_or_else(|poisoned| Arc::clone(&poisoned.into_inner()), |guard| Arc::clone(&guard))
    }

    /// 订阅配置变更事件
    pub fn subscribe_changes(&self) -> Option<broadcast::Receiver<ConfigEvent>> {
        self.watcher.as_ref().map(ConfigWatcher::subscribe)
    }

    /// 手动重载配置
    pub async fn reload(&self) -> crate::error::Result<()> {
        let Some(watcher) = &self.watcher else {
            return Err(RelayError::config("配置热重载功能未启用"));
        };
        watcher.reload().await?;

        let mut config = (*watcher.get_config().await).clone();
        Self::apply_env_overrides(&mut config, &self.env_overrides)?;
        validate_config(&config)?;
        if let Ok(mut guard) = self.config.write() {
            *guard = Arc::new(config);
        }
        info!(component = "config.manager", "手动重载配置成功");
        Ok(())
    }

    /// 构建环境变量覆盖映射
    fn build_env_overrides() -> HashMap<String, String> {
        let overrides = Self::collect_overrides(env::vars());
        debug!(component = "config.manager", count = overrides.len(), "发现环境变量覆盖");
        overrides
    }

    fn collect_overrides(vars: impl IntoIterator<Item = (String, String)>) -> HashMap<String, String> {
        vars.into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_OVERRIDE_PREFIX)
                    .map(|config_key| (config_key.to_lowercase().replace('_', "."), value))
            })
            .collect()
    }

    /// 应用环境变量覆盖
    fn apply_env_overrides(
        config: &mut AppConfig,
        overrides: &HashMap<String, String>,
    ) -> crate::error::Result<()> {
        for (path, value) in overrides {
            let sensitive = path.contains("key") || path.contains("secret");
            debug!(
                component = "config.manager",
                path = %path,
                value = if sensitive { "***" } else { value.as_str() },
                "应用环境变量覆盖"
            );
            Self::apply_override_to_config(config, path, value)?;
        }
        Ok(())
    }

    /// 将单个覆盖应用到配置对象
    fn apply_override_to_config(
        config: &mut AppConfig,
        path: &str,
        value: &str,
    ) -> crate::error::Result<()> {
        let parts: Vec<&str> = path.split('.').collect();

        match parts.as_slice() {
            ["server", "host"] => config.server.host = value.to_string(),
            ["server", "port"] => config.server.port = parse_value(path, value)?,
            ["relay", "hide", "upstream", "error"] => {
                config.relay.hide_upstream_error = parse_value(path, value)?;
            }
            ["relay", "show", "body", "when", "fail"] => {
                config.relay.show_body_when_fail = parse_value(path, value)?;
            }
            ["relay", "timeout", "secs"] | ["relay", "relay", "timeout", "secs"] => {
                config.relay.relay_timeout_secs = parse_value(path, value)?;
            }
            ["relay", "fetch", "task", "timeout", "secs"] => {
                config.relay.fetch_task_timeout_secs = parse_value(path, value)?;
            }
            ["notify", "limit", "count"] => config.notify.limit_count = parse_value(path, value)?,
            ["notify", "limit", "duration", "minutes"] => {
                config.notify.limit_duration_minutes = parse_value(path, value)?;
            }
            ["worker", "url"] => config.worker.url = value.to_string(),
            ["worker", "valid", "key"] => config.worker.valid_key = value.to_string(),
            _ => {
                warn!(component = "config.manager", path, "未知的配置路径，忽略环境变量覆盖");
            }
        }

        Ok(())
    }
}

fn parse_value<T>(path: &str, value: &str) -> crate::error::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(|e| {
        RelayError::config_with_source(format!("环境变量覆盖值无效: {path} = {value}"), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_collect_overrides_maps_prefix_to_paths() {
        let vars = vec![
            ("RELAY_SERVER_PORT".to_string(), "9000".to_string()),
            ("RELAY_RELAY_HIDE_UPSTREAM_ERROR".to_string(), "true".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let overrides = ConfigManager::collect_overrides(vars);
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides["server.port"], "9000");
        assert_eq!(overrides["relay.hide.upstream.error"], "true");
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = AppConfig::default();
        let overrides = ConfigManager::collect_overrides(vec![
            ("RELAY_SERVER_PORT".to_string(), "9000".to_string()),
            ("RELAY_RELAY_HIDE_UPSTREAM_ERROR".to_string(), "true".to_string()),
            ("RELAY_NOTIFY_LIMIT_COUNT".to_string(), "5".to_string()),
            ("RELAY_UNKNOWN_THING".to_string(), "x".to_string()),
        ]);
        ConfigManager::apply_env_overrides(&mut config, &overrides).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(config.relay.hide_upstream_error);
        assert_eq!(config.notify.limit_count, 5);
    }

    #[test]
    fn test_invalid_override_value_is_error() {
        let mut config = AppConfig::default();
        let result = ConfigManager::apply_override_to_config(&mut config, "server.port", "abc");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_from_file_without_watch() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(
            temp_file,
            r#"
[server]
host = "127.0.0.1"
port = 8081
"#
        )
        .unwrap();

        let manager = ConfigManager::build(temp_file.path(), HashMap::new(), false).unwrap();
        assert_eq!(manager.current().server.port, 8081);
        assert!(manager.subscribe_changes().is_none());
        assert!(manager.reload().await.is_err());
    }
}
