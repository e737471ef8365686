//! # 测试数据 Fixtures
//!
//! 渠道配置与转发上下文的构建器

use std::collections::HashMap;

use crate::config::{AppConfig, ChannelConfig};
use crate::relay::constant::{ApiType, ChannelType, RelayFormat, RelayMode};
use crate::relay::info::{RelayInfo, TaskRelayInfo};

/// 渠道测试数据构建器
#[derive(Debug, Clone)]
pub struct ChannelFixture {
    channel: ChannelConfig,
}

impl ChannelFixture {
    /// 创建指定类型的渠道 fixture
    pub fn new(channel_type: ChannelType) -> Self {
        Self {
            channel: ChannelConfig {
                id: 1,
                name: "test-channel".to_string(),
                channel_type,
                base_url: None,
                key: "sk-test".to_string(),
                models: vec!["gpt-4o".to_string(), "gpt".to_string()],
                model_mapping: HashMap::new(),
                status_code_mapping: None,
                force_format: false,
                think_to_content: false,
                enabled: true,
            },
        }
    }

    pub fn id(mut self, id: i64) -> Self {
        self.channel.id = id;
        self
    }

    /// 设置上游地址（通常指向 wiremock 服务器）
    pub fn base_url(mut self, base_url: &str) -> Self {
        self.channel.base_url = Some(base_url.to_string());
        self
    }

    pub fn key(mut self, key: &str) -> Self {
        self.channel.key = key.to_string();
        self
    }

    pub fn models(mut self, models: &[&str]) -> Self {
        self.channel.models = models.iter().map(|m| (*m).to_string()).collect();
        self
    }

    /// 添加模型重定向
    pub fn mapping(mut self, from: &str, to: &str) -> Self {
        self.channel.model_mapping.insert(from.to_string(), to.to_string());
        self
    }

    pub fn status_code_mapping(mut self, mapping: &str) -> Self {
        self.channel.status_code_mapping = Some(mapping.to_string());
        self
    }

    pub fn force_format(mut self) -> Self {
        self.channel.force_format = true;
        self
    }

    pub fn think_to_content(mut self) -> Self {
        self.channel.think_to_content = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.channel.enabled = false;
        self
    }

    /// 转换为渠道配置
    pub fn build(self) -> ChannelConfig {
        self.channel
    }

    /// 构造该渠道上的转发上下文
    pub fn relay_info(&self, mode: RelayMode, format: RelayFormat, model: &str) -> RelayInfo {
        let api_type = self.channel.channel_type.api_type().unwrap_or(ApiType::OpenAI);
        RelayInfo::new(&self.channel, api_type, mode, format, model)
    }

    /// 构造该渠道上的任务转发上下文
    pub fn task_info(&self) -> Option<TaskRelayInfo> {
        let platform = self.channel.channel_type.task_platform()?;
        Some(TaskRelayInfo::new(&self.channel, platform))
    }
}

/// 由若干渠道组成的应用配置
pub fn app_config_with(channels: Vec<ChannelConfig>) -> AppConfig {
    AppConfig {
        channels,
        ..AppConfig::default()
    }
}
