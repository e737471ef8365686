//! # 服务共享状态

use std::sync::Arc;

use crate::config::{AppConfig, ConfigManager};
use crate::notification::{Mailer, NotifyService};
use crate::relay::channel::api_request::RelayClient;

/// 所有路由共享的只读状态
#[derive(Clone)]
pub struct AppState {
    config: Arc<ConfigManager>,
    http: RelayClient,
    notify: NotifyService,
}

impl AppState {
    /// 按启动时的配置创建 HTTP 客户端与通知服务
    pub fn new(config: Arc<ConfigManager>, mailer: Arc<dyn Mailer>) -> Self {
        let current = config.current();
        let http = RelayClient::new(current.relay.relay_timeout_secs);
        let notify = NotifyService::new(&current.notify, current.worker.clone(), mailer);
        Self {
            config,
            http,
            notify,
        }
    }

    /// 当前配置快照，热重载后下一个请求即可见
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.current()
    }

    pub const fn http(&self) -> &RelayClient {
        &self.http
    }

    pub const fn notify(&self) -> &NotifyService {
        &self.notify
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("http", &self.http)
            .field("notify", &self.notify)
            .finish_non_exhaustive()
    }
}
