//! # 应用配置结构定义

use crate::relay::constant::ChannelType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 转发行为配置
    #[serde(default)]
    pub relay: RelayConfig,
    /// 上游渠道列表
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// 通知配置
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Webhook 中转 worker 配置
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 是否启用 CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_enabled: true,
        }
    }
}

/// 转发行为配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 隐藏上游错误详情（429 除外）
    pub hide_upstream_error: bool,
    /// 上游错误体无法解析时是否原样返回
    pub show_body_when_fail: bool,
    /// 上游请求超时（秒），0 表示不限制
    pub relay_timeout_secs: u64,
    /// 任务查询超时（秒）
    pub fetch_task_timeout_secs: u64,
    /// 图像异步任务轮询间隔（毫秒）
    pub image_poll_interval_ms: u64,
    /// 图像异步任务最大轮询次数
    pub image_poll_max_attempts: u32,
    /// 流式响应通道容量
    pub stream_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            hide_upstream_error: false,
            show_body_when_fail: false,
            relay_timeout_secs: 300,
            fetch_task_timeout_secs: 15,
            image_poll_interval_ms: 1000,
            image_poll_max_attempts: 60,
            stream_buffer: 64,
        }
    }
}

/// 上游渠道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// 渠道ID
    pub id: i64,
    /// 渠道名称
    #[serde(default)]
    pub name: String,
    /// 渠道类型
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// 上游地址，缺省时使用渠道类型的默认地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// 上游密钥
    #[serde(default)]
    pub key: String,
    /// 该渠道服务的模型
    #[serde(default)]
    pub models: Vec<String>,
    /// 模型重定向：客户端模型名 -> 上游模型名
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    /// 状态码重映射（JSON 字符串，如 `{"404":"500"}`）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code_mapping: Option<String>,
    /// 强制重新序列化流式帧
    #[serde(default)]
    pub force_format: bool,
    /// 将推理内容折叠进 `<think>` 正文
    #[serde(default)]
    pub think_to_content: bool,
    /// 是否启用
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ChannelConfig {
    /// 实际使用的上游地址（去掉末尾斜杠）
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.channel_type.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// 映射后的上游模型名
    pub fn upstream_model(&self, model: &str) -> String {
        self.model_mapping
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }

    /// 是否服务该模型
    pub fn serves(&self, model: &str) -> bool {
        self.enabled && self.models.iter().any(|m| m == model)
    }
}

/// 通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// 窗口内每个(用户, 通知类型)允许的最大通知次数
    pub limit_count: u32,
    /// 限流窗口（分钟）
    pub limit_duration_minutes: u64,
    /// Webhook 直连超时（秒）
    pub webhook_timeout_secs: u64,
    /// 管理员通知设置，上游密钥失效等事件发给该用户
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<RootNotifyConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            limit_count: 2,
            limit_duration_minutes: 10,
            webhook_timeout_secs: 5,
            root: None,
        }
    }
}

/// 管理员通知设置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RootNotifyConfig {
    pub user_id: i64,
    /// 账户邮箱
    pub email: String,
    /// `email` 或 `webhook`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

/// Webhook 中转 worker 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// worker 地址，为空时直连
    pub url: String,
    /// worker 校验密钥
    pub valid_key: String,
}

impl WorkerConfig {
    /// 是否启用 worker 中转
    pub fn enabled(&self) -> bool {
        !self.url.is_empty()
    }
}

const fn default_true() -> bool {
    true
}

impl AppConfig {
    /// 按模型选择渠道；`pinned` 指定时只接受该渠道
    pub fn select_channel(&self, model: &str, pinned: Option<i64>) -> Option<&ChannelConfig> {
        match pinned {
            Some(id) => self
                .channels
                .iter()
                .find(|c| c.id == id && c.enabled),
            None => self.channels.iter().find(|c| c.serves(model)),
        }
    }

    /// 按渠道类型选择第一个启用的渠道
    pub fn channel_of_type(&self, channel_type: ChannelType) -> Option<&ChannelConfig> {
        self.channels
            .iter()
            .find(|c| c.enabled && c.channel_type == channel_type)
    }

    /// 所有启用渠道的模型（去重，保持配置顺序）
    pub fn all_models(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.channels
            .iter()
            .filter(|c| c.enabled)
            .flat_map(|c| c.models.iter())
            .filter(|m| seen.insert(m.as_str()))
            .cloned()
            .collect()
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }
        if self.relay.stream_buffer == 0 {
            return Err("relay.stream_buffer must be greater than 0".to_string());
        }
        if self.notify.limit_count == 0 {
            return Err("notify.limit_count must be greater than 0".to_string());
        }

        let mut ids = HashSet::new();
        for channel in &self.channels {
            if !ids.insert(channel.id) {
                return Err(format!("duplicate channel id: {}", channel.id));
            }
            if channel.models.is_empty() && channel.channel_type.task_platform().is_none() {
                return Err(format!("channel {} must declare at least one model", channel.id));
            }
        }

        if self.worker.enabled() && self.worker.valid_key.is_empty() {
            return Err("worker.valid_key must be set when worker.url is configured".to_string());
        }

        Ok(())
    }
}
