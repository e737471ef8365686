//! # 通知分发
//!
//! 独立于转发路径的出站通知：先按 (用户, 通知类型) 限流，再按用户偏好走邮件或 webhook。

pub mod email;
pub mod limit;
pub mod webhook;

pub use email::{Mailer, UnconfiguredMailer};
pub use limit::{LimitOutcome, NotificationLimiter};
pub use webhook::{WebhookPayload, WebhookSender, generate_signature};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{NotifyConfig, RootNotifyConfig, WorkerConfig};
use crate::error::{RelayError, Result};

/// 内容模板中的占位符，按顺序逐个替换
pub const CONTENT_VALUE_PARAM: &str = "{{value}}";

/// 投递方式
pub const NOTIFY_TYPE_EMAIL: &str = "email";
pub const NOTIFY_TYPE_WEBHOOK: &str = "webhook";

/// 通知类型
pub const NOTIFY_QUOTA_EXCEED: &str = "quota_exceed";
pub const NOTIFY_CHANNEL_UPDATE: &str = "channel_update";
pub const NOTIFY_CHANNEL_TEST: &str = "channel_test";

/// 一条通知
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Notify {
    #[serde(rename = "type")]
    pub notify_type: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl Notify {
    pub fn new(
        notify_type: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        values: Vec<Value>,
    ) -> Self {
        Self {
            notify_type: notify_type.into(),
            title: title.into(),
            content: content.into(),
            values,
        }
    }
}

/// 用户的通知偏好
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserSetting {
    /// `email`（缺省）或 `webhook`
    pub notify_type: Option<String>,
    /// 覆盖账户邮箱
    pub notification_email: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

impl From<&RootNotifyConfig> for UserSetting {
    fn from(root: &RootNotifyConfig) -> Self {
        Self {
            notify_type: root.notify_type.clone(),
            notification_email: root.notification_email.clone(),
            webhook_url: root.webhook_url.clone(),
            webhook_secret: root.webhook_secret.clone(),
        }
    }
}

/// 按顺序把每个值替换到下一个占位符，替换进来的文本不再参与匹配
pub fn substitute_placeholders(template: &str, values: &[Value]) -> String {
    let mut values = values.iter();
    let mut parts = template.split(CONTENT_VALUE_PARAM);
    let mut content = String::with_capacity(template.len());
    content.push_str(parts.next().unwrap_or_default());
    for part in parts {
        match values.next() {
            Some(Value::String(s)) => content.push_str(s),
            Some(other) => content.push_str(&other.to_string()),
            None => content.push_str(CONTENT_VALUE_PARAM),
        }
        content.push_str(part);
    }
    content
}

/// 通知服务
#[derive(Clone)]
pub struct NotifyService {
    limiter: NotificationLimiter,
    mailer: Arc<dyn Mailer>,
    webhook: WebhookSender,
    root: Option<RootNotifyConfig>,
}

impl NotifyService {
    pub fn new(config: &NotifyConfig, worker: WorkerConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            limiter: NotificationLimiter::new(
                config.limit_count,
                Duration::from_secs(config.limit_duration_minutes.saturating_mul(60)),
            ),
            mailer,
            webhook: WebhookSender::new(Duration::from_secs(config.webhook_timeout_secs), worker),
            root: config.root.clone(),
        }
    }

    /// 向用户发送通知
    ///
    /// 超出限额时返回错误且不投递；缺少邮箱或 webhook 地址时记录日志并跳过。
    pub async fn notify_user(
        &self,
        user_id: i64,
        email: &str,
        setting: &UserSetting,
        notify: &Notify,
    ) -> Result<()> {
        let notify_type = setting.notify_type.as_deref().unwrap_or(NOTIFY_TYPE_EMAIL);

        let outcome = self.limiter.check(user_id, &notify.notify_type).await;
        if !outcome.allowed {
            return Err(RelayError::rate_limit(format!(
                "notification limit exceeded for user {user_id} with type {}",
                notify.notify_type
            )));
        }

        match notify_type {
            NOTIFY_TYPE_WEBHOOK => {
                let Some(url) = setting.webhook_url.as_deref().filter(|u| !u.is_empty()) else {
                    warn!(component = "relay.notify", user_id, "用户未配置 webhook 地址，跳过");
                    return Ok(());
                };
                self.webhook
                    .send(url, setting.webhook_secret.as_deref(), notify)
                    .await
            }
            NOTIFY_TYPE_EMAIL => {
                let address = setting
                    .notification_email
                    .as_deref()
                    .filter(|e| !e.is_empty())
                    .unwrap_or(email);
                if address.is_empty() {
                    info!(component = "relay.notify", user_id, "用户没有邮箱，跳过邮件通知");
                    return Ok(());
                }
                let content = substitute_placeholders(&notify.content, &notify.values);
                self.mailer.send(&notify.title, address, &content).await
            }
            other => {
                warn!(component = "relay.notify", user_id, notify_type = other, "未知的通知方式");
                Ok(())
            }
        }
    }

    /// 通知管理员，失败只记录日志
    pub async fn notify_root_user(&self, notify_type: &str, subject: &str, content: &str) {
        let Some(root) = &self.root else {
            warn!(component = "relay.notify", subject, "未配置管理员通知，跳过");
            return;
        };
        let notify = Notify::new(notify_type, subject, content, Vec::new());
        if let Err(e) = self
            .notify_user(root.user_id, &root.email, &UserSetting::from(root), &notify)
            .await
        {
            error!(component = "relay.notify", error = %e, "failed to notify root user");
        }
    }
}

impl std::fmt::Debug for NotifyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyService")
            .field("limiter", &self.limiter)
            .field("root", &self.root.as_ref().map(|r| r.user_id))
            .finish_non_exhaustive()
    }
}
