//! # 配置文件监控模块
//!
//! 实现配置文件的热重载功能

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};

use super::{AppConfig, load_config_from_file};

/// 配置变更事件
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// 配置重载成功
    Reloaded(Arc<AppConfig>),
    /// 配置重载失败
    ReloadFailed(String),
    /// 配置文件被删除
    FileDeleted,
}

/// 配置监控器
pub struct ConfigWatcher {
    /// 当前配置
    config: Arc<RwLock<Arc<AppConfig>>>,
    /// 配置文件路径
    config_path: PathBuf,
    /// 事件发送器
    event_sender: broadcast::Sender<ConfigEvent>,
    /// 文件监控器
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// 创建新的配置监控器，必须在 tokio 运行时内调用
    pub fn new(config_path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let runtime = Handle::try_current().map_err(|e| {
            crate::error::RelayError::config_with_source("配置监控需要运行在 tokio 运行时中", e)
        })?;

        let initial_config = load_config_from_file(&config_path)?;
        let config = Arc::new(RwLock::new(Arc::new(initial_config)));

        let (event_sender, _) = broadcast::channel(64);

        let config_clone = Arc::clone(&config);
        let sender_clone = event_sender.clone();
        let path_clone = config_path.clone();

        // notify 回调运行在独立线程上，配置写入经由运行时句柄完成
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => Self::handle_file_event(
                    &event,
                    &runtime,
                    &config_clone,
                    &sender_clone,
                    &path_clone,
                ),
                Err(e) => error!(component = "config.watcher", error = %e, "文件监控错误"),
            })
            .map_err(|e| crate::error::RelayError::config_with_source("创建文件监控器失败", e))?;

        let config_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        watcher
            .watch(config_dir, RecursiveMode::NonRecursive)
            .map_err(|e| crate::error::RelayError::config_with_source("启动文件监控失败", e))?;

        info!(component = "config.watcher", path = %config_path.display(), "配置文件监控器已启动");

        Ok(Self {
            config,
            config_path,
            event_sender,
            _watcher: watcher,
        })
    }

    /// 获取当前配置
    pub async fn get_config(&self) -> Arc<AppConfig> {
        Arc::clone(&*self.config.read().await)
    }

    /// 订阅配置变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.event_sender.subscribe()
    }

    /// 手动重载配置
    pub async fn reload(&self) -> crate::error::Result<()> {
        match load_config_from_file(&self.config_path) {
            Ok(new_config) => {
                let new_config = Arc::new(new_config);
                *self.config.write().await = Arc::clone(&new_config);
                let _ = self.event_sender.send(ConfigEvent::Reloaded(new_config));
                info!(component = "config.watcher", "配置重载成功");
                Ok(())
            }
            Err(e) => {
                let error_msg = format!("配置重载失败: {e}");
                let _ = self
                    .event_sender
                    .send(ConfigEvent::ReloadFailed(error_msg.clone()));
                Err(crate::error::RelayError::config(error_msg))
            }
        }
    }

    /// 处理文件变更事件
    fn handle_file_event(
        event: &Event,
        runtime: &Handle,
        config: &Arc<RwLock<Arc<AppConfig>>>,
        sender: &broadcast::Sender<ConfigEvent>,
        config_path: &Path,
    ) {
        let is_our_file = event
            .paths
            .iter()
            .any(|path| path.file_name() == config_path.file_name());

        if !is_our_file {
            return;
        }

        match &event.kind {
            EventKind::Modify(_) | EventKind::Create(_) => {
                debug!(component = "config.watcher", paths = ?event.paths, "检测到配置文件变更");

                // 等待文件写入完成
                std::thread::sleep(std::time::Duration::from_millis(100));

                match load_config_from_file(config_path) {
                    Ok(new_config) => {
                        let new_config = Arc::new(new_config);
                        let config_clone = Arc::clone(config);
                        let sender_clone = sender.clone();
                        runtime.spawn(async move {
                            *config_clone.write().await = Arc::clone(&new_config);
                            let _ = sender_clone.send(ConfigEvent::Reloaded(new_config));
                            info!(component = "config.watcher", "配置文件热重载成功");
                        });
                    }
                    Err(e) => {
                        let error_msg = format!("配置文件重载失败: {e}");
                        warn!(component = "config.watcher", "{error_msg}");
                        let _ = sender.send(ConfigEvent::ReloadFailed(error_msg));
                    }
                }
            }
            EventKind::Remove(_) => {
                warn!(component = "config.watcher", paths = ?event.paths, "配置文件被删除");
                let _ = sender.send(ConfigEvent::FileDeleted);
            }
            _ => {}
        }
    }
}
