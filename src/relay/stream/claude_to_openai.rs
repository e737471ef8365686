//! # Claude 事件流 -> OpenAI 流

use crate::dto::claude::{ClaudeContentBlock, ClaudeDelta, ClaudeError, ClaudeStreamEvent};
use crate::dto::openai::{
    ChatCompletionsStreamResponse, Delta, FunctionCall, StreamChoice, ToolCall, Usage,
};
use crate::relay::convert::stop_reason_claude_to_openai;

/// Claude 流转换状态
#[derive(Debug, Clone, Default)]
pub struct ClaudeStreamState {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// 下一个工具调用在 OpenAI 流中的 index
    next_tool_index: u32,
}

impl ClaudeStreamState {
    pub fn new(id: String, model: String, created: i64) -> Self {
        Self {
            id,
            model,
            created,
            ..Self::default()
        }
    }

    /// 当前累计的用量
    pub const fn usage(&self) -> Usage {
        Usage::new(self.input_tokens, self.output_tokens)
    }

    pub const fn has_usage(&self) -> bool {
        self.input_tokens != 0 || self.output_tokens != 0
    }

    /// 记录 `message_start` 与 `message_delta` 携带的用量，其余事件忽略
    pub fn record_usage(&mut self, event: &ClaudeStreamEvent) {
        match event {
            ClaudeStreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.input_tokens;
                self.output_tokens = message.usage.output_tokens;
            }
            ClaudeStreamEvent::MessageDelta { usage: Some(usage), .. } => {
                if usage.input_tokens != 0 {
                    self.input_tokens = usage.input_tokens;
                }
                self.output_tokens = usage.output_tokens;
            }
            _ => {}
        }
    }

    /// 转换一个 Claude 事件；不产生 OpenAI 帧的事件返回 `Ok(None)`
    pub fn convert(
        &mut self,
        event: &ClaudeStreamEvent,
    ) -> Result<Option<ChatCompletionsStreamResponse>, ClaudeError> {
        self.record_usage(event);
        let delta = match event {
            ClaudeStreamEvent::MessageStart { message } => {
                if !message.id.is_empty() {
                    self.id.clone_from(&message.id);
                }
                Delta {
                    role: Some("assistant".to_string()),
                    content: Some(String::new()),
                    ..Delta::default()
                }
            }
            ClaudeStreamEvent::ContentBlockStart {
                content_block: ClaudeContentBlock::ToolUse { id, name, .. },
                ..
            } => {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                Delta {
                    tool_calls: Some(vec![ToolCall {
                        index: Some(index),
                        id: Some(id.clone()),
                        call_type: Some("function".to_string()),
                        function: FunctionCall {
                            name: name.clone(),
                            arguments: String::new(),
                        },
                    }]),
                    ..Delta::default()
                }
            }
            ClaudeStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ClaudeDelta::TextDelta { text } => Delta {
                    content: Some(text.clone()),
                    ..Delta::default()
                },
                ClaudeDelta::ThinkingDelta { thinking } => Delta {
                    reasoning_content: Some(thinking.clone()),
                    ..Delta::default()
                },
                ClaudeDelta::InputJsonDelta { partial_json } => Delta {
                    tool_calls: Some(vec![ToolCall {
                        index: Some(self.next_tool_index.saturating_sub(1)),
                        function: FunctionCall {
                            name: String::new(),
                            arguments: partial_json.clone(),
                        },
                        ..ToolCall::default()
                    }]),
                    ..Delta::default()
                },
                ClaudeDelta::SignatureDelta { .. } => return Ok(None),
            },
            ClaudeStreamEvent::MessageDelta { delta, .. } => {
                let reason = delta.stop_reason.as_deref().unwrap_or("end_turn");
                return Ok(Some(self.frame(
                    Delta::default(),
                    Some(stop_reason_claude_to_openai(reason).to_string()),
                )));
            }
            ClaudeStreamEvent::Error { error } => return Err(error.clone()),
            _ => return Ok(None),
        };
        Ok(Some(self.frame(delta, None)))
    }

    fn frame(&self, delta: Delta, finish_reason: Option<String>) -> ChatCompletionsStreamResponse {
        ChatCompletionsStreamResponse {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: None,
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> ClaudeStreamEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_text_and_usage() {
        let mut state = ClaudeStreamState::new("x".into(), "gpt".into(), 1);
        let start = state
            .convert(&event(json!({
                "type": "message_start",
                "message": {"id": "msg_1", "model": "claude", "usage": {"input_tokens": 9, "output_tokens": 1}}
            })))
            .unwrap()
            .unwrap();
        assert_eq!(start.id, "msg_1");
        assert_eq!(start.choices[0].delta.role.as_deref(), Some("assistant"));

        let text = state
            .convert(&event(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "hi"}})))
            .unwrap()
            .unwrap();
        assert_eq!(text.choices[0].delta.content_str(), "hi");

        assert!(state.convert(&event(json!({"type": "ping"}))).unwrap().is_none());

        let fin = state
            .convert(&event(json!({
                "type": "message_delta",
                "delta": {"stop_reason": "max_tokens"},
                "usage": {"output_tokens": 12}
            })))
            .unwrap()
            .unwrap();
        assert_eq!(fin.choices[0].finish_reason.as_deref(), Some("length"));
        assert_eq!(state.usage(), Usage::new(9, 12));
    }

    #[test]
    fn test_tool_use_indices() {
        let mut state = ClaudeStreamState::default();
        let start = state
            .convert(&event(json!({
                "type": "content_block_start", "index": 1,
                "content_block": {"type": "tool_use", "id": "tu_1", "name": "calc", "input": {}}
            })))
            .unwrap()
            .unwrap();
        let call = &start.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.index, Some(0));
        assert_eq!(call.function.name, "calc");

        let args = state
            .convert(&event(json!({
                "type": "content_block_delta", "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"a\""}
            })))
            .unwrap()
            .unwrap();
        let call = &args.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.index, Some(0));
        assert_eq!(call.function.arguments, "{\"a\"");
    }

    #[test]
    fn test_record_usage_without_conversion() {
        let mut state = ClaudeStreamState::default();
        state.record_usage(&event(json!({
            "type": "message_start",
            "message": {"id": "msg_1", "model": "claude", "usage": {"input_tokens": 7, "output_tokens": 1}}
        })));
        state.record_usage(&event(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "hi"}})));
        state.record_usage(&event(json!({"type": "error", "error": {"type": "overloaded_error", "message": "busy"}})));
        state.record_usage(&event(json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn"},
            "usage": {"output_tokens": 5}
        })));

        assert_eq!(state.usage(), Usage::new(7, 5));
        assert!(state.id.is_empty());
    }

    #[test]
    fn test_error_event() {
        let mut state = ClaudeStreamState::default();
        let err = state
            .convert(&event(json!({"type": "error", "error": {"type": "overloaded_error", "message": "busy"}})))
            .unwrap_err();
        assert_eq!(err.message, "busy");
    }
}
