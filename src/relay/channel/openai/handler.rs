//! # OpenAI 形态响应处理
//!
//! 流式与非流式解码器，供所有 OpenAI 兼容的渠道共用。

use axum::http::{HeaderValue, StatusCode, header};
use bytes::Bytes;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::dto::openai::{
    ChatCompletionsStreamResponse, Delta, EmbeddingResponse, ResponsesUsage, TextResponse, Usage,
};
use crate::relay::channel::api_request::UpstreamResponse;
use crate::relay::constant::RelayFormat;
use crate::relay::convert::response_openai_to_claude;
use crate::relay::error::{OpenAIError, OpenAIErrorWithStatusCode, openai_error_wrapper};
use crate::relay::helper::{
    ClientWriter, claude_data, done, event_data, next_upstream, object_data, string_data,
};
use crate::relay::info::{RelayInfo, ThinkingContentInfo};
use crate::relay::stream::{StreamAccumulator, stream_response_openai_to_claude};
use crate::utils::token_counter::{estimate_completion_tokens, estimate_tokens};

const THINK_OPEN: &str = "<think>\n";
const THINK_CLOSE: &str = "\n</think>\n";

/// OpenAI 流式响应
///
/// 最后一帧保留到流结束再处理：它可能只携带用量，客户端未要求用量时不转发。
pub async fn oai_stream_handler(
    resp: UpstreamResponse,
    info: &mut RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let mut events = resp.into_event_stream();
    let mut stream_items: Vec<String> = Vec::new();
    let mut last_stream_data: Option<String> = None;

    while let Some(event) = next_upstream(&mut events, writer).await? {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(component = "relay.stream", request_id = %info.request_id, error = %e, "读取上游流失败");
                break;
            }
        };
        let data = event.data.trim();
        if data.is_empty() {
            continue;
        }
        if event.is_done() {
            break;
        }
        info.mark_first_response();
        if let Some(previous) = last_stream_data.take() {
            handle_stream_format(writer, info, &previous).await?;
        }
        stream_items.push(data.to_string());
        last_stream_data = Some(data.to_string());
    }

    let mut acc = StreamAccumulator::new();
    let mut should_send_last = true;
    if let Some(last) = &last_stream_data {
        match acc.absorb_last_frame(last, info.should_include_usage) {
            Ok(send) => should_send_last = send,
            Err(e) => warn!(component = "relay.stream", request_id = %info.request_id, error = %e, "解析最后一帧失败"),
        }
        // 最后一帧不计入已发送帧数
        if should_send_last && info.relay_format == RelayFormat::OpenAI {
            send_stream_data(writer, info, last).await?;
        }
    }

    acc.accumulate(info.relay_mode, &stream_items);
    let usage = acc.final_usage(info.prompt_tokens);

    debug!(
        component = "relay.stream",
        request_id = %info.request_id,
        frames = stream_items.len(),
        sent = info.send_response_count,
        tool_count = acc.tool_count(),
        stream_usage = acc.contains_stream_usage,
        "上游流结束"
    );

    handle_final_response(writer, info, last_stream_data.as_deref(), &acc, usage).await?;
    Ok(usage)
}

/// 按客户端格式转发一帧
async fn handle_stream_format(
    writer: &mut ClientWriter,
    info: &mut RelayInfo,
    data: &str,
) -> Result<(), OpenAIErrorWithStatusCode> {
    info.send_response_count += 1;
    match info.relay_format {
        RelayFormat::OpenAI => send_stream_data(writer, info, data).await,
        RelayFormat::Claude => handle_claude_format(writer, info, data).await,
    }
}

async fn send_stream_data(
    writer: &mut ClientWriter,
    info: &mut RelayInfo,
    data: &str,
) -> Result<(), OpenAIErrorWithStatusCode> {
    if !info.force_format && !info.think_to_content {
        return string_data(writer, data).await;
    }

    let chunk: ChatCompletionsStreamResponse = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(component = "relay.stream", request_id = %info.request_id, error = %e, "流式帧无法解析，原样转发");
            return string_data(writer, data).await;
        }
    };

    if !info.think_to_content {
        return object_data(writer, &chunk).await;
    }

    for frame in fold_thinking(chunk, &mut info.thinking_content_info) {
        object_data(writer, &frame).await?;
    }
    Ok(())
}

/// 把推理内容折叠进正文：首段推理前插入 `<think>`，推理结束后的首段正文前插入 `</think>`
pub fn fold_thinking(
    chunk: ChatCompletionsStreamResponse,
    state: &mut ThinkingContentInfo,
) -> Vec<ChatCompletionsStreamResponse> {
    let has_thinking = chunk
        .choices
        .iter()
        .any(|c| !c.delta.reasoning_str().is_empty());
    let has_content = chunk.choices.iter().any(|c| !c.delta.content_str().is_empty());
    let mut frames = Vec::new();

    if has_thinking {
        if !state.opened {
            state.opened = true;
            frames.push(marker_frame(&chunk, THINK_OPEN));
        }
        let mut thinking = chunk.clone();
        for choice in &mut thinking.choices {
            let reasoning = choice.delta.reasoning_str().to_string();
            if has_content {
                choice.delta = Delta::default();
                choice.finish_reason = None;
            }
            choice.delta.content = Some(reasoning);
            choice.delta.reasoning_content = None;
            choice.delta.reasoning = None;
        }
        if has_content {
            thinking.usage = None;
        }
        frames.push(thinking);
    }

    if has_content && state.opened && !state.closed {
        state.closed = true;
        frames.push(marker_frame(&chunk, THINK_CLOSE));
    }

    if has_content || !has_thinking {
        let mut rest = chunk;
        for choice in &mut rest.choices {
            choice.delta.reasoning_content = None;
            choice.delta.reasoning = None;
        }
        frames.push(rest);
    }

    frames
}

fn marker_frame(chunk: &ChatCompletionsStreamResponse, text: &str) -> ChatCompletionsStreamResponse {
    let mut frame = ChatCompletionsStreamResponse::text_chunk(&chunk.id, chunk.created, &chunk.model, text);
    frame.system_fingerprint.clone_from(&chunk.system_fingerprint);
    frame
}

async fn handle_claude_format(
    writer: &mut ClientWriter,
    info: &mut RelayInfo,
    data: &str,
) -> Result<(), OpenAIErrorWithStatusCode> {
    let chunk: ChatCompletionsStreamResponse = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(component = "relay.stream", request_id = %info.request_id, error = %e, "跳过无法解析的流式帧");
            return Ok(());
        }
    };
    if let Some(usage) = chunk.usage.filter(Usage::is_valid) {
        info.claude_convert_info.usage = Some(usage);
    }
    for event in stream_response_openai_to_claude(&chunk, info) {
        claude_data(writer, &event).await?;
    }
    Ok(())
}

async fn handle_final_response(
    writer: &mut ClientWriter,
    info: &mut RelayInfo,
    last_stream_data: Option<&str>,
    acc: &StreamAccumulator,
    usage: Usage,
) -> Result<(), OpenAIErrorWithStatusCode> {
    match info.relay_format {
        RelayFormat::OpenAI => {
            if info.should_include_usage && !acc.contains_stream_usage {
                let id = if acc.response_id.is_empty() {
                    format!("chatcmpl-{}", info.request_id)
                } else {
                    acc.response_id.clone()
                };
                let created = if acc.created == 0 { Utc::now().timestamp() } else { acc.created };
                let model = if acc.model.is_empty() { &info.upstream_model_name } else { &acc.model };
                let mut frame = ChatCompletionsStreamResponse::final_usage(&id, created, model, usage);
                frame.system_fingerprint.clone_from(&acc.system_fingerprint);
                object_data(writer, &frame).await?;
            }
            done(writer).await
        }
        RelayFormat::Claude => {
            info.claude_convert_info.done = true;
            info.claude_convert_info.usage = Some(usage);
            let chunk = last_stream_data
                .and_then(|data| serde_json::from_str::<ChatCompletionsStreamResponse>(data).ok())
                .unwrap_or_default();
            for event in stream_response_openai_to_claude(&chunk, info) {
                claude_data(writer, &event).await?;
            }
            Ok(())
        }
    }
}

fn read_failed(e: impl std::fmt::Display) -> OpenAIErrorWithStatusCode {
    openai_error_wrapper(e, "read_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
}

fn unmarshal_failed(e: impl std::fmt::Display) -> OpenAIErrorWithStatusCode {
    openai_error_wrapper(e, "unmarshal_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
}

/// 成功状态码下的 OpenAI 错误体
fn embedded_error(value: &Value, status: StatusCode) -> Option<OpenAIErrorWithStatusCode> {
    let error = value
        .get("error")
        .filter(|e| e.is_object())
        .and_then(|e| serde_json::from_value::<OpenAIError>(e.clone()).ok())
        .filter(|e| !e.error_type.is_empty() || !e.message.is_empty())?;
    let status = if status.is_success() { StatusCode::INTERNAL_SERVER_ERROR } else { status };
    Some(OpenAIErrorWithStatusCode {
        error,
        status_code: status.as_u16(),
        local_error: false,
    })
}

/// 写出 JSON 响应体，沿用上游状态码
async fn write_json_passthrough(
    writer: &mut ClientWriter,
    status: StatusCode,
    body: Bytes,
) -> Result<(), OpenAIErrorWithStatusCode> {
    writer.set_status(status);
    writer.set_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    writer.write_bytes(body).await
}

/// 非流式 chat / completions 响应
pub async fn openai_handler(
    resp: UpstreamResponse,
    info: &mut RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let status = resp.status;
    let body = resp.bytes().await.map_err(read_failed)?;
    let mut value: Value = serde_json::from_slice(&body).map_err(unmarshal_failed)?;
    if let Some(err) = embedded_error(&value, status) {
        return Err(err);
    }
    let response: TextResponse = serde_json::from_value(value.clone()).map_err(unmarshal_failed)?;

    let estimated = !response.usage.is_valid();
    let usage = if estimated {
        let tool_count = response
            .choices
            .iter()
            .map(|c| c.message.tool_calls.as_ref().map_or(0, Vec::len))
            .max()
            .unwrap_or(0);
        let usage = Usage::new(
            info.prompt_tokens,
            estimate_completion_tokens(&response.completion_text(), tool_count),
        );
        value["usage"] = json!(usage);
        usage
    } else {
        response.usage
    };

    match info.relay_format {
        RelayFormat::OpenAI => {
            if estimated {
                writer.set_status(status);
                writer.write_json(&value).await?;
            } else {
                write_json_passthrough(writer, status, body).await?;
            }
        }
        RelayFormat::Claude => {
            let claude = response_openai_to_claude(&response, usage, &info.origin_model_name);
            writer.set_status(status);
            writer.write_json(&claude).await?;
        }
    }
    Ok(usage)
}

/// 嵌入响应透传
pub async fn embedding_handler(
    resp: UpstreamResponse,
    info: &RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let status = resp.status;
    let body = resp.bytes().await.map_err(read_failed)?;
    let value: Value = serde_json::from_slice(&body).map_err(unmarshal_failed)?;
    if let Some(err) = embedded_error(&value, status) {
        return Err(err);
    }
    let response: EmbeddingResponse = serde_json::from_value(value).map_err(unmarshal_failed)?;
    let usage = if response.usage.is_valid() {
        Usage::new(response.usage.prompt_tokens, 0)
    } else {
        Usage::new(info.prompt_tokens, 0)
    };
    write_json_passthrough(writer, status, body).await?;
    Ok(usage)
}

/// 图像生成响应透传
pub async fn image_handler(
    resp: UpstreamResponse,
    info: &RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let status = resp.status;
    let body = resp.bytes().await.map_err(read_failed)?;
    let value: Value = serde_json::from_slice(&body).map_err(unmarshal_failed)?;
    if let Some(err) = embedded_error(&value, status) {
        return Err(err);
    }
    write_json_passthrough(writer, status, body).await?;
    Ok(Usage::new(info.prompt_tokens, 0))
}

/// 语音合成：二进制透传，用量按输入文本计
pub async fn audio_handler(
    resp: UpstreamResponse,
    info: &RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let status = resp.status;
    let content_type = resp
        .headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let body = resp.bytes().await.map_err(read_failed)?;

    writer.set_status(status);
    writer.set_header(header::CONTENT_TYPE, content_type);
    writer.write_bytes(body).await?;
    Ok(Usage::new(info.prompt_tokens, 0))
}

/// Responses API 非流式响应透传
pub async fn responses_handler(
    resp: UpstreamResponse,
    info: &RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let status = resp.status;
    let body = resp.bytes().await.map_err(read_failed)?;
    let value: Value = serde_json::from_slice(&body).map_err(unmarshal_failed)?;
    if let Some(err) = embedded_error(&value, status) {
        return Err(err);
    }
    let usage = value
        .get("usage")
        .and_then(|u| serde_json::from_value::<ResponsesUsage>(u.clone()).ok())
        .map(Usage::from)
        .filter(Usage::is_valid)
        .unwrap_or_else(|| Usage::new(info.prompt_tokens, 0));
    write_json_passthrough(writer, status, body).await?;
    Ok(usage)
}

/// Responses API 流式透传，从 `response.completed` 事件读取用量
pub async fn responses_stream_handler(
    resp: UpstreamResponse,
    info: &mut RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let mut events = resp.into_event_stream();
    let mut usage: Option<Usage> = None;
    let mut text = String::new();

    while let Some(event) = next_upstream(&mut events, writer).await? {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(component = "relay.stream", request_id = %info.request_id, error = %e, "读取上游流失败");
                break;
            }
        };
        if event.data.is_empty() {
            continue;
        }
        info.mark_first_response();
        info.send_response_count += 1;

        match &event.event {
            Some(name) => event_data(writer, name, &event.data).await?,
            None => string_data(writer, &event.data).await?,
        }

        if let Ok(value) = serde_json::from_str::<Value>(&event.data) {
            match value.get("type").and_then(Value::as_str) {
                Some("response.output_text.delta") => {
                    if let Some(delta) = value.get("delta").and_then(Value::as_str) {
                        text.push_str(delta);
                    }
                }
                Some("response.completed") => {
                    usage = value
                        .pointer("/response/usage")
                        .and_then(|u| serde_json::from_value::<ResponsesUsage>(u.clone()).ok())
                        .map(Usage::from)
                        .filter(Usage::is_valid);
                }
                _ => {}
            }
        }
    }

    Ok(usage.unwrap_or_else(|| Usage::new(info.prompt_tokens, estimate_tokens(&text))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::constant::{ChannelType, RelayMode};
    use crate::relay::helper::drain;
    use crate::testing::{ChannelFixture, sse_body};
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    fn stream_info(format: RelayFormat) -> RelayInfo {
        let mut info = ChannelFixture::new(ChannelType::OpenAI).relay_info(RelayMode::ChatCompletions, format, "gpt-4o");
        info.is_stream = true;
        info.prompt_tokens = 5;
        info
    }

    async fn run(
        info: &mut RelayInfo,
        frames: &[Value],
    ) -> (Result<Usage, OpenAIErrorWithStatusCode>, String) {
        let (tx, rx) = mpsc::channel(64);
        let mut writer = ClientWriter::streaming(tx);
        let upstream = UpstreamResponse::from_bytes(StatusCode::OK, sse_body(frames));
        let result = oai_stream_handler(upstream, info, &mut writer).await;
        drop(writer);
        (result, drain(rx).await)
    }

    fn data_lines(out: &str) -> Vec<String> {
        out.split("\n\n")
            .filter_map(|f| f.strip_prefix("data: "))
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_usage_only_last_frame_suppressed_without_opt_in() {
        let mut info = stream_info(RelayFormat::OpenAI);
        let frames = vec![
            json!({"id": "c", "choices": [{"delta": {"content": "Hi"}}]}),
            json!({"id": "c", "choices": [], "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}}),
        ];
        let (usage, out) = run(&mut info, &frames).await;
        assert_eq!(usage.unwrap(), Usage::new(5, 1));
        let lines = data_lines(&out);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"Hi\""));
        assert_eq!(lines[1], "[DONE]");
        assert_eq!(info.send_response_count, 1);
    }

    #[tokio::test]
    async fn test_synthesized_usage_frame_when_requested() {
        let mut info = stream_info(RelayFormat::OpenAI);
        info.should_include_usage = true;
        let frames = vec![
            json!({"id": "c", "created": 9, "model": "gpt-4o", "choices": [{"delta": {"content": "abcd"}}]}),
            json!({"id": "c", "created": 9, "model": "gpt-4o", "choices": [{"delta": {}, "finish_reason": "stop"}]}),
        ];
        let (usage, out) = run(&mut info, &frames).await;
        assert_eq!(usage.unwrap(), Usage::new(5, 1));

        let lines = data_lines(&out);
        assert_eq!(lines.len(), 4);
        let usage_frame: ChatCompletionsStreamResponse = serde_json::from_str(&lines[2]).unwrap();
        assert_eq!(usage_frame.id, "c");
        assert_eq!(usage_frame.created, 9);
        assert_eq!(usage_frame.usage, Some(Usage::new(5, 1)));
        assert!(usage_frame.choices.is_empty());
        assert_eq!(lines[3], "[DONE]");
    }

    #[tokio::test]
    async fn test_forwarded_last_frame_not_counted() {
        let mut info = stream_info(RelayFormat::OpenAI);
        let frames = vec![
            json!({"id": "c", "choices": [{"delta": {"content": "a"}}]}),
            json!({"id": "c", "choices": [{"delta": {"content": "b"}}]}),
            json!({"id": "c", "choices": [{"delta": {}, "finish_reason": "stop"}]}),
        ];
        let (usage, out) = run(&mut info, &frames).await;
        assert!(usage.is_ok());

        let lines = data_lines(&out);
        assert_eq!(lines.len(), 4);
        assert!(lines[2].contains("\"stop\""));
        assert_eq!(info.send_response_count, 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_frame_skipped_rest_of_stream_delivered() {
        let mut info = stream_info(RelayFormat::OpenAI);
        let mut body = Vec::new();
        body.extend_from_slice(b"data: {\"id\":\"c\",\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n\n");
        body.extend_from_slice(b"data: {\"id\":\"c\",\"choices\":[{\"delta\":{\"content\":\"\xff\"}}]}\n\n");
        body.extend_from_slice(b"data: {\"id\":\"c\",\"choices\":[{\"delta\":{\"content\":\"two\"}}]}\n\n");
        body.extend_from_slice(b"data: {\"id\":\"c\",\"choices\":[{\"delta\":{\"content\":\"three\"}}]}\n\n");
        body.extend_from_slice(b"data: [DONE]\n\n");

        let (tx, rx) = mpsc::channel(64);
        let mut writer = ClientWriter::streaming(tx);
        let upstream = UpstreamResponse::from_bytes(StatusCode::OK, body);
        let result = oai_stream_handler(upstream, &mut info, &mut writer).await;
        drop(writer);
        let out = drain(rx).await;

        assert!(result.is_ok());
        let lines = data_lines(&out);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("\"one\""));
        assert!(lines[1].contains("\"two\""));
        assert!(lines[2].contains("\"three\""));
        assert_eq!(lines[3], "[DONE]");
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_stalled_upstream() {
        let mut info = stream_info(RelayFormat::OpenAI);
        let frames = sse_body(&[
            json!({"id": "c", "choices": [{"delta": {"content": "a"}}]}),
            json!({"id": "c", "choices": [{"delta": {"content": "b"}}]}),
        ]);
        let first = Bytes::from(frames.replace("data: [DONE]\n\n", ""));
        let body = futures::stream::iter([Ok(first)])
            .chain(futures::stream::pending())
            .boxed();
        let upstream = UpstreamResponse::from_stream(StatusCode::OK, body);

        let (tx, mut rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            let mut writer = ClientWriter::streaming(tx);
            oai_stream_handler(upstream, &mut info, &mut writer).await
        });

        assert!(rx.recv().await.is_some());
        drop(rx);

        let err = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("handler must return once the client is gone")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.status_code, 499);
        assert!(err.local_error);
    }

    #[tokio::test]
    async fn test_claude_client_receives_event_stream() {
        let mut info = stream_info(RelayFormat::Claude);
        let frames = vec![
            json!({"id": "c", "choices": [{"delta": {"content": "Hel"}}]}),
            json!({"id": "c", "choices": [{"delta": {"content": "lo"}, "finish_reason": "stop"}]}),
        ];
        let (usage, out) = run(&mut info, &frames).await;
        assert_eq!(usage.unwrap().prompt_tokens, 5);

        let names: Vec<_> = out
            .split("\n\n")
            .filter_map(|f| f.lines().next()?.strip_prefix("event: "))
            .collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert!(info.claude_convert_info.done);
        assert!(!out.contains("[DONE]"));
    }

    #[tokio::test]
    async fn test_estimate_when_no_stream_usage() {
        let mut info = stream_info(RelayFormat::OpenAI);
        let frames = vec![json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "t", "function": {"name": "ab", "arguments": "cd"}}
        ]}}]})];
        let (usage, _) = run(&mut info, &frames).await;
        assert_eq!(usage.unwrap(), Usage::new(5, 1 + 7));
    }

    #[test]
    fn test_fold_thinking_sequence() {
        let mut state = ThinkingContentInfo::default();
        let think: ChatCompletionsStreamResponse =
            serde_json::from_value(json!({"choices": [{"delta": {"reasoning_content": "hmm"}}]})).unwrap();
        let frames = fold_thinking(think, &mut state);
        let texts: Vec<_> = frames.iter().map(|f| f.choices[0].delta.content_str().to_string()).collect();
        assert_eq!(texts, vec![THINK_OPEN.to_string(), "hmm".to_string()]);
        assert!(frames[1].choices[0].delta.reasoning_content.is_none());

        let answer: ChatCompletionsStreamResponse =
            serde_json::from_value(json!({"choices": [{"delta": {"content": "ok"}}]})).unwrap();
        let frames = fold_thinking(answer.clone(), &mut state);
        let texts: Vec<_> = frames.iter().map(|f| f.choices[0].delta.content_str().to_string()).collect();
        assert_eq!(texts, vec![THINK_CLOSE.to_string(), "ok".to_string()]);

        let frames = fold_thinking(answer, &mut state);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_fold_thinking_without_reasoning_never_closes() {
        let mut state = ThinkingContentInfo::default();
        let answer: ChatCompletionsStreamResponse =
            serde_json::from_value(json!({"choices": [{"delta": {"content": "ok"}}]})).unwrap();
        let frames = fold_thinking(answer, &mut state);
        assert_eq!(frames.len(), 1);
        assert!(!state.closed);
    }

    #[tokio::test]
    async fn test_openai_handler_to_claude() {
        let mut info = ChannelFixture::new(ChannelType::OpenAI).relay_info(
            RelayMode::ChatCompletions,
            RelayFormat::Claude,
            "gpt-4o",
        );
        let body = json!({
            "id": "x",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        });
        let mut writer = ClientWriter::buffered();
        let usage = openai_handler(
            UpstreamResponse::from_bytes(StatusCode::OK, body.to_string()),
            &mut info,
            &mut writer,
        )
        .await
        .unwrap();
        assert_eq!(usage, Usage::new(3, 1));
        let out: Value = serde_json::from_slice(writer.buffered_body()).unwrap();
        assert_eq!(out["type"], "message");
        assert_eq!(out["content"][0]["text"], "hello");
        assert_eq!(out["stop_reason"], "end_turn");
    }

    #[tokio::test]
    async fn test_openai_handler_fills_missing_usage() {
        let mut info = ChannelFixture::new(ChannelType::OpenAI).relay_info(
            RelayMode::ChatCompletions,
            RelayFormat::OpenAI,
            "gpt-4o",
        );
        info.prompt_tokens = 2;
        let body = json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "abcdefgh"}}]});
        let mut writer = ClientWriter::buffered();
        let usage = openai_handler(
            UpstreamResponse::from_bytes(StatusCode::OK, body.to_string()),
            &mut info,
            &mut writer,
        )
        .await
        .unwrap();
        assert_eq!(usage, Usage::new(2, 2));
        let out: Value = serde_json::from_slice(writer.buffered_body()).unwrap();
        assert_eq!(out["usage"]["total_tokens"], 4);
    }

    #[tokio::test]
    async fn test_embedded_error_in_success_body() {
        let mut info = ChannelFixture::new(ChannelType::OpenAI).relay_info(
            RelayMode::ChatCompletions,
            RelayFormat::OpenAI,
            "gpt-4o",
        );
        let body = json!({"error": {"message": "model overloaded", "type": "server_error"}});
        let mut writer = ClientWriter::buffered();
        let err = openai_handler(
            UpstreamResponse::from_bytes(StatusCode::OK, body.to_string()),
            &mut info,
            &mut writer,
        )
        .await
        .unwrap_err();
        assert_eq!(err.error.message, "model overloaded");
        assert_eq!(err.status_code, 500);
    }

    #[tokio::test]
    async fn test_responses_stream_usage() {
        let mut info = stream_info(RelayFormat::OpenAI);
        let body = "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\"hi\"}\n\n\
                    event: response.completed\ndata: {\"type\":\"response.completed\",\"response\":{\"usage\":{\"input_tokens\":4,\"output_tokens\":2,\"total_tokens\":6}}}\n\n";
        let (tx, rx) = mpsc::channel(16);
        let mut writer = ClientWriter::streaming(tx);
        let usage = responses_stream_handler(
            UpstreamResponse::from_bytes(StatusCode::OK, body),
            &mut info,
            &mut writer,
        )
        .await
        .unwrap();
        drop(writer);
        assert_eq!(usage, Usage::new(4, 2));
        let out = drain(rx).await;
        assert!(out.starts_with("event: response.output_text.delta\ndata: "));
        assert_eq!(info.send_response_count, 2);
    }
}
