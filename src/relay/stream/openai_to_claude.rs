//! # OpenAI 流 -> Claude 事件流
//!
//! 每个 OpenAI 增量帧重编码为零个或多个 Claude 事件。跨帧状态保存在
//! `RelayInfo::claude_convert_info` 中；标记 `done` 后的调用会关闭打开的内容块，
//! 并输出带用量的 `message_delta` 与 `message_stop`。

use serde_json::json;

use crate::dto::claude::{
    ClaudeContentBlock, ClaudeDelta, ClaudeMessageDelta, ClaudeResponse, ClaudeStreamEvent,
    ClaudeUsage,
};
use crate::dto::openai::ChatCompletionsStreamResponse;
use crate::relay::convert::stop_reason_openai_to_claude;
use crate::relay::info::{ClaudeConvertInfo, OpenBlock, RelayInfo};

/// 转换一个 OpenAI 流式帧
pub fn stream_response_openai_to_claude(
    chunk: &ChatCompletionsStreamResponse,
    info: &mut RelayInfo,
) -> Vec<ClaudeStreamEvent> {
    let mut events = Vec::new();
    let prompt_tokens = info.prompt_tokens;
    let model = info.origin_model_name.clone();
    let request_id = info.request_id.clone();
    let state = &mut info.claude_convert_info;

    if state.message_stopped {
        return events;
    }

    if !state.message_started {
        state.message_started = true;
        let id = if chunk.id.is_empty() {
            format!("msg_{request_id}")
        } else {
            chunk.id.clone()
        };
        events.push(ClaudeStreamEvent::MessageStart {
            message: ClaudeResponse {
                id,
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                model,
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: ClaudeUsage {
                    input_tokens: prompt_tokens,
                    output_tokens: 0,
                },
            },
        });
    }

    for choice in &chunk.choices {
        let reasoning = choice.delta.reasoning_str();
        if !reasoning.is_empty() {
            let index = state.ensure_block(OpenBlock::Thinking, &mut events, || ClaudeContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            });
            events.push(ClaudeStreamEvent::ContentBlockDelta {
                index,
                delta: ClaudeDelta::ThinkingDelta {
                    thinking: reasoning.to_string(),
                },
            });
        }

        let content = choice.delta.content_str();
        if !content.is_empty() {
            let index = state.ensure_block(OpenBlock::Text, &mut events, || ClaudeContentBlock::Text {
                text: String::new(),
            });
            events.push(ClaudeStreamEvent::ContentBlockDelta {
                index,
                delta: ClaudeDelta::TextDelta {
                    text: content.to_string(),
                },
            });
        }

        for tool in choice.delta.tool_calls.iter().flatten() {
            let tool_index = tool.index.unwrap_or(0);
            let starts_new = tool.id.is_some() || state.open_block != Some(OpenBlock::Tool(tool_index));
            if starts_new {
                state.close_block(&mut events);
                let index = state.open(OpenBlock::Tool(tool_index));
                events.push(ClaudeStreamEvent::ContentBlockStart {
                    index,
                    content_block: ClaudeContentBlock::ToolUse {
                        id: tool.id.clone().unwrap_or_default(),
                        name: tool.function.name.clone(),
                        input: json!({}),
                    },
                });
            }
            if !tool.function.arguments.is_empty() {
                events.push(ClaudeStreamEvent::ContentBlockDelta {
                    index: state.current_index(),
                    delta: ClaudeDelta::InputJsonDelta {
                        partial_json: tool.function.arguments.clone(),
                    },
                });
            }
        }

        if let Some(reason) = &choice.finish_reason {
            state.finish_reason = Some(reason.clone());
        }
    }

    if let Some(usage) = chunk.usage.filter(|u| u.is_valid()) {
        state.usage = Some(usage);
    }

    if state.done {
        state.close_block(&mut events);
        let usage = state.usage.unwrap_or_default();
        let reason = state.finish_reason.as_deref().unwrap_or("stop");
        events.push(ClaudeStreamEvent::MessageDelta {
            delta: ClaudeMessageDelta {
                stop_reason: Some(stop_reason_openai_to_claude(reason).to_string()),
                stop_sequence: None,
            },
            usage: Some(ClaudeUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            }),
        });
        events.push(ClaudeStreamEvent::MessageStop);
        state.message_stopped = true;
    }

    events
}

impl ClaudeConvertInfo {
    const fn current_index(&self) -> u32 {
        self.next_block_index.saturating_sub(1)
    }

    fn open(&mut self, block: OpenBlock) -> u32 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        self.open_block = Some(block);
        index
    }

    fn close_block(&mut self, events: &mut Vec<ClaudeStreamEvent>) {
        if self.open_block.take().is_some() {
            events.push(ClaudeStreamEvent::ContentBlockStop {
                index: self.current_index(),
            });
        }
    }

    /// 确保指定类型的内容块已打开，返回其序号
    fn ensure_block(
        &mut self,
        kind: OpenBlock,
        events: &mut Vec<ClaudeStreamEvent>,
        start: impl FnOnce() -> ClaudeContentBlock,
    ) -> u32 {
        if self.open_block == Some(kind) {
            return self.current_index();
        }
        self.close_block(events);
        let index = self.open(kind);
        events.push(ClaudeStreamEvent::ContentBlockStart {
            index,
            content_block: start(),
        });
        index
    }
}
