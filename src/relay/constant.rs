//! # 转发层常量与枚举

use serde::{Deserialize, Serialize};

/// 渠道类型（上游厂商）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// OpenAI 官方
    OpenAI,
    /// 任意 OpenAI 兼容服务
    Custom,
    /// Anthropic 官方 Messages API
    Anthropic,
    /// 阿里云 DashScope
    Ali,
    /// Suno 音乐生成（异步任务）
    Suno,
    /// Jina 重排序 / 嵌入
    Jina,
    /// Xinference 本地推理
    Xinference,
}

impl ChannelType {
    /// 渠道类型的数值编号
    pub const fn id(self) -> u32 {
        match self {
            Self::OpenAI => 1,
            Self::Custom => 8,
            Self::Anthropic => 14,
            Self::Ali => 17,
            Self::Suno => 36,
            Self::Jina => 38,
            Self::Xinference => 47,
        }
    }

    /// 同步转发使用的适配器族；任务类渠道返回 `None`
    pub const fn api_type(self) -> Option<ApiType> {
        match self {
            Self::OpenAI | Self::Custom => Some(ApiType::OpenAI),
            Self::Anthropic => Some(ApiType::Anthropic),
            Self::Ali => Some(ApiType::Ali),
            Self::Jina => Some(ApiType::Jina),
            Self::Xinference => Some(ApiType::Xinference),
            Self::Suno => None,
        }
    }

    /// 异步任务平台
    pub const fn task_platform(self) -> Option<TaskPlatform> {
        match self {
            Self::Suno => Some(TaskPlatform::Suno),
            _ => None,
        }
    }

    /// 默认上游地址
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Ali => "https://dashscope.aliyuncs.com",
            Self::Jina => "https://api.jina.ai",
            Self::Xinference => "http://127.0.0.1:9997",
            Self::Custom | Self::Suno => "",
        }
    }
}

/// 适配器族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiType {
    OpenAI,
    Anthropic,
    Ali,
    Jina,
    Xinference,
}

/// 异步任务平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPlatform {
    Suno,
}

/// 请求的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayMode {
    ChatCompletions,
    Completions,
    Embeddings,
    ImagesGenerations,
    Rerank,
    AudioSpeech,
    Responses,
}

impl RelayMode {
    /// 由入站路径推断操作类型
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        let mode = if path.ends_with("/chat/completions") || path.ends_with("/messages") {
            Self::ChatCompletions
        } else if path.ends_with("/completions") {
            Self::Completions
        } else if path.ends_with("/embeddings") {
            Self::Embeddings
        } else if path.ends_with("/images/generations") {
            Self::ImagesGenerations
        } else if path.ends_with("/rerank") {
            Self::Rerank
        } else if path.ends_with("/audio/speech") {
            Self::AudioSpeech
        } else if path.ends_with("/responses") {
            Self::Responses
        } else {
            return None;
        };
        Some(mode)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatCompletions => "chat_completions",
            Self::Completions => "completions",
            Self::Embeddings => "embeddings",
            Self::ImagesGenerations => "images_generations",
            Self::Rerank => "rerank",
            Self::AudioSpeech => "audio_speech",
            Self::Responses => "responses",
        }
    }
}

/// 客户端使用的协议格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelayFormat {
    #[default]
    OpenAI,
    Claude,
}

/// Suno 支持的动作
pub const SUNO_ACTION_MUSIC: &str = "MUSIC";
pub const SUNO_ACTION_LYRICS: &str = "LYRICS";

/// Anthropic API 版本头
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_mode_from_path() {
        assert_eq!(RelayMode::from_path("/v1/chat/completions"), Some(RelayMode::ChatCompletions));
        assert_eq!(RelayMode::from_path("/v1/completions"), Some(RelayMode::Completions));
        assert_eq!(RelayMode::from_path("/v1/messages"), Some(RelayMode::ChatCompletions));
        assert_eq!(RelayMode::from_path("/v1/rerank/"), Some(RelayMode::Rerank));
        assert_eq!(RelayMode::from_path("/v1/unknown"), None);
    }

    #[test]
    fn test_channel_type_serde_and_families() {
        let ty: ChannelType = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(ty, ChannelType::OpenAI);
        assert_eq!(ChannelType::Custom.api_type(), Some(ApiType::OpenAI));
        assert_eq!(ChannelType::Suno.api_type(), None);
        assert_eq!(ChannelType::Suno.task_platform(), Some(TaskPlatform::Suno));
        assert_eq!(ChannelType::Xinference.id(), 47);
    }
}
