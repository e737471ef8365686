//! # 流式累积
//!
//! 收集流中的文本、推理内容与工具调用，用于流结束后计算（或估算）用量。
//! 帧先整体按数组解码，失败时退回逐帧解码，跳过并记录解析失败的帧。

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::dto::openai::{ChatCompletionsStreamResponse, CompletionsStreamResponse, Usage};
use crate::relay::constant::RelayMode;
use crate::utils::token_counter::estimate_completion_tokens;

/// 分层解码结果
#[derive(Debug)]
pub struct DecodeOutcome<T> {
    /// 成功解码的帧，保持原始顺序
    pub items: Vec<T>,
    /// 解码失败的帧下标
    pub failed: Vec<usize>,
    /// 是否一次性整体解码成功
    pub batched: bool,
}

/// 先整体解码 `[item,item,...]`，失败时逐帧解码
pub fn decode_frames<T: DeserializeOwned>(raw: &[String]) -> DecodeOutcome<T> {
    let joined = format!("[{}]", raw.join(","));
    match serde_json::from_str::<Vec<T>>(&joined) {
        Ok(items) => DecodeOutcome {
            items,
            failed: Vec::new(),
            batched: true,
        },
        Err(e) => {
            warn!(component = "relay.stream", error = %e, frames = raw.len(), "批量解码失败，改为逐帧解码");
            let mut items = Vec::with_capacity(raw.len());
            let mut failed = Vec::new();
            for (idx, item) in raw.iter().enumerate() {
                match serde_json::from_str::<T>(item) {
                    Ok(value) => items.push(value),
                    Err(e) => {
                        warn!(component = "relay.stream", error = %e, index = idx, "跳过无法解析的流式帧");
                        failed.push(idx);
                    }
                }
            }
            DecodeOutcome {
                items,
                failed,
                batched: false,
            }
        }
    }
}

/// 流式累积器
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    /// 内容、推理与工具调用文本
    text: String,
    /// 单帧工具调用数组长度的最大值
    tool_count: usize,
    pub response_id: String,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: Option<String>,
    pub usage: Usage,
    /// 上游在流中给出了有效用量
    pub contains_stream_usage: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub const fn tool_count(&self) -> usize {
        self.tool_count
    }

    /// 累积一个 chat completions 帧
    pub fn push_chat(&mut self, frame: &ChatCompletionsStreamResponse) {
        for choice in &frame.choices {
            self.text.push_str(choice.delta.content_str());
            self.text.push_str(choice.delta.reasoning_str());
            if let Some(tools) = &choice.delta.tool_calls {
                self.tool_count = self.tool_count.max(tools.len());
                for tool in tools {
                    self.text.push_str(&tool.function.name);
                    self.text.push_str(&tool.function.arguments);
                }
            }
        }
    }

    /// 累积一个 completions 帧
    pub fn push_completion(&mut self, frame: &CompletionsStreamResponse) {
        for choice in &frame.choices {
            self.text.push_str(&choice.text);
        }
    }

    /// 按操作类型解码并累积全部原始帧，返回解码失败的帧下标
    pub fn accumulate(&mut self, mode: RelayMode, raw: &[String]) -> Vec<usize> {
        match mode {
            RelayMode::Completions => {
                let outcome = decode_frames::<CompletionsStreamResponse>(raw);
                outcome.items.iter().for_each(|f| self.push_completion(f));
                outcome.failed
            }
            _ => {
                let outcome = decode_frames::<ChatCompletionsStreamResponse>(raw);
                outcome.items.iter().for_each(|f| self.push_chat(f));
                outcome.failed
            }
        }
    }

    /// 从最后一帧读取响应元数据与用量
    ///
    /// 返回该帧是否仍需发给客户端：携带用量但客户端未要求用量时不发送。
    pub fn absorb_last_frame(&mut self, raw: &str, should_include_usage: bool) -> serde_json::Result<bool> {
        let last: ChatCompletionsStreamResponse = serde_json::from_str(raw)?;
        self.response_id = last.id;
        self.created = last.created;
        self.system_fingerprint = last.system_fingerprint;
        self.model = last.model;

        match last.usage {
            Some(usage) if usage.is_valid() => {
                self.contains_stream_usage = true;
                self.usage = usage;
                Ok(should_include_usage)
            }
            _ => Ok(true),
        }
    }

    /// 流结束时的用量：上游给出则直接使用，否则按累积文本估算
    pub fn final_usage(&self, prompt_tokens: u32) -> Usage {
        if self.contains_stream_usage {
            return self.usage;
        }
        Usage::new(prompt_tokens, estimate_completion_tokens(&self.text, self.tool_count))
    }
}
