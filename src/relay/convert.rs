//! # OpenAI / Claude 协议互转（非流式部分）
//!
//! 请求与一次性响应的双向转换。流式事件的转换见 [`crate::relay::stream`]。

use chrono::Utc;
use serde_json::{Value, json};

use crate::dto::claude::{
    ClaudeContent, ClaudeContentBlock, ClaudeImageSource, ClaudeMessage, ClaudeRequest,
    ClaudeResponse, ClaudeSystem, ClaudeTool, ClaudeUsage,
};
use crate::dto::openai::{
    ContentPart, FunctionCall, FunctionDefinition, GeneralOpenAIRequest, ImageUrl, Message,
    MessageContent, StreamOptions, TextChoice, TextResponse, ToolCall, ToolDefinition, Usage,
};

/// Claude 请求缺省的最大输出 token
pub const DEFAULT_CLAUDE_MAX_TOKENS: u32 = 4096;

/// OpenAI finish_reason -> Claude stop_reason
pub fn stop_reason_openai_to_claude(reason: &str) -> &'static str {
    match reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        _ => "end_turn",
    }
}

/// Claude stop_reason -> OpenAI finish_reason
pub fn stop_reason_claude_to_openai(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

/// OpenAI 请求 -> Claude Messages 请求
pub fn request_openai_to_claude(request: &GeneralOpenAIRequest, model: &str) -> ClaudeRequest {
    let mut system_parts = Vec::new();
    let mut messages: Vec<ClaudeMessage> = Vec::new();

    for message in &request.messages {
        match message.role.as_str() {
            "system" | "developer" => system_parts.push(message.string_content()),
            "tool" => {
                let block = ClaudeContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: Value::String(message.string_content()),
                    is_error: None,
                };
                push_blocks(&mut messages, "user", vec![block]);
            }
            role => {
                let role = if role == "assistant" { "assistant" } else { "user" };
                let mut blocks = openai_content_to_blocks(message);
                for call in message.tool_calls.iter().flatten() {
                    blocks.push(ClaudeContentBlock::ToolUse {
                        id: call.id.clone().unwrap_or_default(),
                        name: call.function.name.clone(),
                        input: serde_json::from_str(&call.function.arguments)
                            .unwrap_or_else(|_| json!({})),
                    });
                }
                if !blocks.is_empty() {
                    push_blocks(&mut messages, role, blocks);
                }
            }
        }
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| ClaudeTool {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: tool
                    .function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            })
            .collect()
    });

    ClaudeRequest {
        model: model.to_string(),
        system: (!system_parts.is_empty()).then(|| ClaudeSystem::Text(system_parts.join("\n"))),
        messages,
        max_tokens: request
            .max_tokens
            .or(request.max_completion_tokens)
            .unwrap_or(DEFAULT_CLAUDE_MAX_TOKENS),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stop_sequences: request.stop.as_ref().and_then(stop_sequences),
        stream: request.stream,
        tools,
        tool_choice: request.tool_choice.as_ref().and_then(tool_choice_openai_to_claude),
        thinking: None,
        metadata: None,
    }
}

/// 连续同角色消息合并为一条
fn push_blocks(messages: &mut Vec<ClaudeMessage>, role: &str, blocks: Vec<ClaudeContentBlock>) {
    if let Some(last) = messages.last_mut() {
        if last.role == role {
            let mut merged = match std::mem::replace(&mut last.content, ClaudeContent::Blocks(Vec::new())) {
                ClaudeContent::Text(text) => vec![ClaudeContentBlock::Text { text }],
                ClaudeContent::Blocks(existing) => existing,
            };
            merged.extend(blocks);
            last.content = ClaudeContent::Blocks(merged);
            return;
        }
    }
    messages.push(ClaudeMessage {
        role: role.to_string(),
        content: ClaudeContent::Blocks(blocks),
    });
}

fn openai_content_to_blocks(message: &Message) -> Vec<ClaudeContentBlock> {
    match &message.content {
        Some(MessageContent::Text(text)) if !text.is_empty() => {
            vec![ClaudeContentBlock::Text { text: text.clone() }]
        }
        Some(MessageContent::Parts(parts)) => parts.iter().filter_map(part_to_block).collect(),
        _ => Vec::new(),
    }
}

fn part_to_block(part: &ContentPart) -> Option<ClaudeContentBlock> {
    match part.part_type.as_str() {
        "text" => part
            .text
            .as_ref()
            .map(|text| ClaudeContentBlock::Text { text: text.clone() }),
        "image_url" => part.image_url.as_ref().map(|image| ClaudeContentBlock::Image {
            source: image_source(&image.url),
        }),
        _ => None,
    }
}

/// `data:<mime>;base64,<data>` 转为内联图片，其余作为 URL 引用
fn image_source(url: &str) -> ClaudeImageSource {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((meta, data)) = rest.split_once(',') {
            return ClaudeImageSource {
                source_type: "base64".to_string(),
                media_type: Some(meta.trim_end_matches(";base64").to_string()),
                data: Some(data.to_string()),
                url: None,
            };
        }
    }
    ClaudeImageSource {
        source_type: "url".to_string(),
        media_type: None,
        data: None,
        url: Some(url.to_string()),
    }
}

fn stop_sequences(stop: &Value) -> Option<Vec<String>> {
    match stop {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}

fn tool_choice_openai_to_claude(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(s) => match s.as_str() {
            "auto" => Some(json!({"type": "auto"})),
            "required" => Some(json!({"type": "any"})),
            "none" => Some(json!({"type": "none"})),
            _ => None,
        },
        Value::Object(_) => choice
            .pointer("/function/name")
            .and_then(Value::as_str)
            .map(|name| json!({"type": "tool", "name": name})),
        _ => None,
    }
}

fn tool_choice_claude_to_openai(choice: &Value) -> Option<Value> {
    match choice.get("type").and_then(Value::as_str)? {
        "auto" => Some(json!("auto")),
        "any" => Some(json!("required")),
        "none" => Some(json!("none")),
        "tool" => choice
            .get("name")
            .and_then(Value::as_str)
            .map(|name| json!({"type": "function", "function": {"name": name}})),
        _ => None,
    }
}

/// Claude Messages 请求 -> OpenAI 请求
pub fn request_claude_to_openai(request: &ClaudeRequest, model: &str) -> GeneralOpenAIRequest {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        let text = system.text();
        if !text.is_empty() {
            messages.push(Message::text("system", text));
        }
    }

    for message in &request.messages {
        match &message.content {
            ClaudeContent::Text(text) => messages.push(Message::text(&message.role, text.clone())),
            ClaudeContent::Blocks(blocks) => claude_blocks_to_messages(&message.role, blocks, &mut messages),
        }
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.input_schema.clone()),
                },
            })
            .collect()
    });

    let stream = request.is_stream();
    GeneralOpenAIRequest {
        model: model.to_string(),
        messages,
        stream: Some(stream),
        stream_options: stream.then_some(StreamOptions { include_usage: true }),
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stop: request.stop_sequences.as_ref().map(|s| json!(s)),
        tools,
        tool_choice: request.tool_choice.as_ref().and_then(tool_choice_claude_to_openai),
        ..GeneralOpenAIRequest::default()
    }
}

fn claude_blocks_to_messages(role: &str, blocks: &[ClaudeContentBlock], out: &mut Vec<Message>) {
    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut reasoning = String::new();

    for block in blocks {
        match block {
            ClaudeContentBlock::Text { text } => parts.push(ContentPart {
                part_type: "text".to_string(),
                text: Some(text.clone()),
                image_url: None,
            }),
            ClaudeContentBlock::Image { source } => {
                let url = match (&source.data, &source.url) {
                    (Some(data), _) => format!(
                        "data:{};base64,{data}",
                        source.media_type.as_deref().unwrap_or("image/png")
                    ),
                    (None, Some(url)) => url.clone(),
                    (None, None) => continue,
                };
                parts.push(ContentPart {
                    part_type: "image_url".to_string(),
                    text: None,
                    image_url: Some(ImageUrl { url, detail: None }),
                });
            }
            ClaudeContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                index: None,
                id: Some(id.clone()),
                call_type: Some("function".to_string()),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            ClaudeContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => out.push(Message {
                role: "tool".to_string(),
                content: Some(MessageContent::Text(tool_result_text(content))),
                tool_call_id: Some(tool_use_id.clone()),
                ..Message::default()
            }),
            ClaudeContentBlock::Thinking { thinking, .. } => reasoning.push_str(thinking),
            ClaudeContentBlock::Unknown => {}
        }
    }

    if parts.is_empty() && tool_calls.is_empty() {
        return;
    }

    let all_text = parts.iter().all(|p| p.part_type == "text");
    let content = if parts.is_empty() {
        None
    } else if all_text {
        Some(MessageContent::Text(
            parts.iter().filter_map(|p| p.text.as_deref()).collect::<String>(),
        ))
    } else {
        Some(MessageContent::Parts(parts))
    };

    out.push(Message {
        role: role.to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
        ..Message::default()
    });
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// OpenAI 非流式响应 -> Claude 消息
pub fn response_openai_to_claude(response: &TextResponse, usage: Usage, model: &str) -> ClaudeResponse {
    let mut content = Vec::new();
    let mut finish_reason = None;

    if let Some(choice) = response.choices.first() {
        if let Some(reasoning) = choice.message.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
            content.push(ClaudeContentBlock::Thinking {
                thinking: reasoning.clone(),
                signature: None,
            });
        }
        let text = choice
            .text
            .clone()
            .unwrap_or_else(|| choice.message.string_content());
        if !text.is_empty() {
            content.push(ClaudeContentBlock::Text { text });
        }
        for call in choice.message.tool_calls.iter().flatten() {
            content.push(ClaudeContentBlock::ToolUse {
                id: call.id.clone().unwrap_or_default(),
                name: call.function.name.clone(),
                input: serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({})),
            });
        }
        finish_reason = choice.finish_reason.as_deref();
    }

    ClaudeResponse {
        id: response.id.clone(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content,
        stop_reason: Some(stop_reason_openai_to_claude(finish_reason.unwrap_or("stop")).to_string()),
        stop_sequence: None,
        usage: ClaudeUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    }
}

/// Claude 消息 -> OpenAI 非流式响应
pub fn response_claude_to_openai(response: &ClaudeResponse, model: &str) -> TextResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            ClaudeContentBlock::Text { text: t } => text.push_str(t),
            ClaudeContentBlock::Thinking { thinking, .. } => reasoning.push_str(thinking),
            ClaudeContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                index: None,
                id: Some(id.clone()),
                call_type: Some("function".to_string()),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            _ => {}
        }
    }

    let message = Message {
        role: "assistant".to_string(),
        content: Some(MessageContent::Text(text)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
        ..Message::default()
    };

    TextResponse {
        id: response.id.clone(),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        system_fingerprint: None,
        choices: vec![TextChoice {
            index: 0,
            message,
            text: None,
            finish_reason: Some(
                stop_reason_claude_to_openai(response.stop_reason.as_deref().unwrap_or("end_turn"))
                    .to_string(),
            ),
        }],
        usage: Usage::new(response.usage.input_tokens, response.usage.output_tokens),
    }
}
