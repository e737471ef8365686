//! # 请求级转发上下文
//!
//! `RelayInfo` 在入站请求分类后创建，由该请求独占，随请求结束丢弃。

use axum::http::HeaderMap;
use serde_json::Value;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::channel::api_request::RelayClient;
use super::constant::{ApiType, ChannelType, RelayFormat, RelayMode, TaskPlatform};
use crate::config::{ChannelConfig, RelayConfig};
use crate::dto::openai::Usage;
use crate::dto::task::SunoSubmitReq;

/// 客户端侧上下文：入站请求头、插件信息与共享的 HTTP 客户端
#[derive(Clone)]
pub struct ClientContext {
    pub headers: HeaderMap,
    /// 客户端请求的厂商插件（如 DashScope 插件）
    pub plugin: Option<String>,
    pub http: RelayClient,
}

impl ClientContext {
    pub fn new(headers: HeaderMap, http: RelayClient) -> Self {
        let plugin = headers
            .get("x-dashscope-plugin")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Self {
            headers,
            plugin,
            http,
        }
    }

    /// 读取入站请求头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// 思考内容折叠状态（`think_to_content`）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThinkingContentInfo {
    /// 已输出 `<think>` 开标签
    pub opened: bool,
    /// 已输出 `</think>` 闭标签
    pub closed: bool,
}

/// 当前打开的 Claude 内容块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBlock {
    Thinking,
    Text,
    /// 工具调用块，记录上游 tool call 的 index
    Tool(u32),
}

/// OpenAI 流 -> Claude 事件流的转换状态
#[derive(Debug, Clone, Default)]
pub struct ClaudeConvertInfo {
    pub message_started: bool,
    /// 下一个内容块的序号
    pub next_block_index: u32,
    pub open_block: Option<OpenBlock>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    /// 上游流已结束，下一次转换输出结尾事件
    pub done: bool,
    /// 已输出 `message_stop`
    pub message_stopped: bool,
}

/// 图像异步任务轮询策略
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 60,
        }
    }
}

/// 转发上下文
#[derive(Debug, Clone)]
pub struct RelayInfo {
    pub request_id: String,
    pub channel_id: i64,
    pub channel_name: String,
    pub channel_type: ChannelType,
    pub api_type: ApiType,
    pub relay_mode: RelayMode,
    pub relay_format: RelayFormat,
    pub base_url: String,
    pub api_key: String,
    pub origin_model_name: String,
    pub upstream_model_name: String,
    pub is_stream: bool,
    /// 客户端要求流末尾附带用量
    pub should_include_usage: bool,
    /// 已向客户端发送的流式帧数
    pub send_response_count: u32,
    pub prompt_tokens: u32,
    pub force_format: bool,
    pub think_to_content: bool,
    pub status_code_mapping: Option<String>,
    /// 上游错误文案对客户端隐藏
    pub hide_upstream_error: bool,
    /// rerank：是否回填文档
    pub return_documents: bool,
    /// rerank：请求中的原始文档
    pub documents: Vec<Value>,
    /// 图像生成：客户端要求的响应格式（`url` / `b64_json`）
    pub image_response_format: Option<String>,
    pub thinking_content_info: ThinkingContentInfo,
    pub claude_convert_info: ClaudeConvertInfo,
    pub image_poll: PollPolicy,
    pub start_time: Instant,
    pub first_response_time: Option<Instant>,
}

impl RelayInfo {
    /// 由渠道配置与请求分类结果构造
    pub fn new(
        channel: &ChannelConfig,
        api_type: ApiType,
        relay_mode: RelayMode,
        relay_format: RelayFormat,
        origin_model: &str,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            channel_id: channel.id,
            channel_name: channel.name.clone(),
            channel_type: channel.channel_type,
            api_type,
            relay_mode,
            relay_format,
            base_url: channel.effective_base_url(),
            api_key: channel.key.clone(),
            origin_model_name: origin_model.to_string(),
            upstream_model_name: channel.upstream_model(origin_model),
            is_stream: false,
            should_include_usage: false,
            send_response_count: 0,
            prompt_tokens: 0,
            force_format: channel.force_format,
            think_to_content: channel.think_to_content,
            status_code_mapping: channel.status_code_mapping.clone(),
            hide_upstream_error: false,
            return_documents: false,
            documents: Vec::new(),
            image_response_format: None,
            thinking_content_info: ThinkingContentInfo::default(),
            claude_convert_info: ClaudeConvertInfo::default(),
            image_poll: PollPolicy::default(),
            start_time: Instant::now(),
            first_response_time: None,
        }
    }

    /// 应用全局转发配置
    #[must_use]
    pub fn with_relay_config(mut self, relay: &RelayConfig) -> Self {
        self.image_poll = PollPolicy {
            interval: Duration::from_millis(relay.image_poll_interval_ms),
            max_attempts: relay.image_poll_max_attempts,
        };
        self.hide_upstream_error = relay.hide_upstream_error;
        self
    }

    /// 记录首帧到达时间
    pub fn mark_first_response(&mut self) {
        if self.first_response_time.is_none() {
            self.first_response_time = Some(Instant::now());
        }
    }
}

/// 已校验的任务请求体
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    Suno(SunoSubmitReq),
}

/// 异步任务转发上下文
#[derive(Debug, Clone)]
pub struct TaskRelayInfo {
    pub request_id: String,
    pub channel_id: i64,
    pub channel_type: ChannelType,
    pub platform: TaskPlatform,
    pub base_url: String,
    pub api_key: String,
    /// 大写的动作名（MUSIC / LYRICS）
    pub action: String,
    /// 续写时引用的原任务ID
    pub origin_task_id: String,
    /// 校验阶段写入、构造请求体时读取
    pub task_request: Option<TaskRequest>,
}

impl TaskRelayInfo {
    pub fn new(channel: &ChannelConfig, platform: TaskPlatform) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            channel_id: channel.id,
            channel_type: channel.channel_type,
            platform,
            base_url: channel.effective_base_url(),
            api_key: channel.key.clone(),
            action: String::new(),
            origin_task_id: String::new(),
            task_request: None,
        }
    }
}
