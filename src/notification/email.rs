//! # 邮件投递接口
//!
//! SMTP 传输不在本服务内实现，部署方注入 [`Mailer`] 实现。

use async_trait::async_trait;
use tracing::warn;

use crate::error::{RelayError, Result};

/// 邮件发送协作者
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, to: &str, content: &str) -> Result<()>;
}

/// 未配置邮件传输时的占位实现，每次发送都失败
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredMailer;

#[async_trait]
impl Mailer for UnconfiguredMailer {
    async fn send(&self, subject: &str, to: &str, _content: &str) -> Result<()> {
        warn!(component = "relay.notify", subject, to, "邮件传输未配置，丢弃邮件");
        Err(RelayError::notify("mail transport not configured"))
    }
}
