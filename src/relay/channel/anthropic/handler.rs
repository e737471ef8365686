//! # Claude 响应处理
//!
//! Claude 格式客户端逐事件直通并记录用量；OpenAI 格式客户端经 `ClaudeStreamState` 转为 chunk 流。

use axum::http::{HeaderValue, StatusCode, header};
use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::dto::claude::{ClaudeDelta, ClaudeError, ClaudeResponse, ClaudeStreamEvent};
use crate::dto::openai::{ChatCompletionsStreamResponse, Usage};
use crate::relay::channel::api_request::UpstreamResponse;
use crate::relay::constant::RelayFormat;
use crate::relay::convert::response_claude_to_openai;
use crate::relay::error::{
    ERROR_TYPE_UPSTREAM, OpenAIError, OpenAIErrorWithStatusCode, openai_error_wrapper,
};
use crate::relay::helper::{ClientWriter, done, event_data, next_upstream, object_data};
use crate::relay::info::RelayInfo;
use crate::relay::stream::ClaudeStreamState;
use crate::utils::token_counter::estimate_tokens;

fn claude_error(error: ClaudeError, status: StatusCode) -> OpenAIErrorWithStatusCode {
    let status = if status.is_success() { StatusCode::INTERNAL_SERVER_ERROR } else { status };
    OpenAIErrorWithStatusCode {
        error: OpenAIError {
            message: error.message,
            error_type: if error.error_type.is_empty() {
                ERROR_TYPE_UPSTREAM.to_string()
            } else {
                error.error_type
            },
            param: Value::Null,
            code: Value::Null,
        },
        status_code: status.as_u16(),
        local_error: false,
    }
}

/// Claude 事件流
pub async fn claude_stream_handler(
    resp: UpstreamResponse,
    info: &mut RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let mut events = resp.into_event_stream();
    let mut state = ClaudeStreamState::new(
        format!("chatcmpl-{}", info.request_id),
        info.origin_model_name.clone(),
        Utc::now().timestamp(),
    );
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

        let parsed = match serde_json::from_str::<ClaudeStreamEvent>(&event.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(component = "relay.stream", request_id = %info.request_id, error = %e, "跳过无法解析的 Claude 事件");
                continue;
            }
        };
        if let ClaudeStreamEvent::ContentBlockDelta { delta, .. } = &parsed {
            match delta {
                ClaudeDelta::TextDelta { text: t } => text.push_str(t),
                ClaudeDelta::ThinkingDelta { thinking } => text.push_str(thinking),
                ClaudeDelta::InputJsonDelta { partial_json } => text.push_str(partial_json),
                ClaudeDelta::SignatureDelta { .. } => {}
            }
        }

        match info.relay_format {
            RelayFormat::Claude => {
                let name = event.event.as_deref().unwrap_or_else(|| parsed.event_name());
                info.send_response_count += 1;
                event_data(writer, name, &event.data).await?;
                state.record_usage(&parsed);
            }
            RelayFormat::OpenAI => match state.convert(&parsed) {
                Ok(Some(chunk)) => {
                    info.send_response_count += 1;
                    object_data(writer, &chunk).await?;
                }
                Ok(None) => {}
                Err(error) => return Err(claude_error(error, StatusCode::INTERNAL_SERVER_ERROR)),
            },
        }
    }

    let usage = if state.has_usage() {
        state.usage()
    } else {
        Usage::new(info.prompt_tokens, estimate_tokens(&text))
    };

    if info.relay_format == RelayFormat::OpenAI {
        if info.should_include_usage {
            let frame =
                ChatCompletionsStreamResponse::final_usage(&state.id, state.created, &state.model, usage);
            object_data(writer, &frame).await?;
        }
        done(writer).await?;
    }
    Ok(usage)
}

/// Claude 非流式响应
pub async fn claude_handler(
    resp: UpstreamResponse,
    info: &RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let status = resp.status;
    let body = resp.bytes().await.map_err(|e| {
        openai_error_wrapper(e, "read_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    let value: Value = serde_json::from_slice(&body).map_err(|e| {
        openai_error_wrapper(e, "unmarshal_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    if value.get("type").and_then(Value::as_str) == Some("error") {
        let error = value
            .get("error")
            .and_then(|e| serde_json::from_value::<ClaudeError>(e.clone()).ok())
            .unwrap_or_default();
        return Err(claude_error(error, status));
    }
    let response: ClaudeResponse = serde_json::from_value(value).map_err(|e| {
        openai_error_wrapper(e, "unmarshal_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    let usage = Usage::new(response.usage.input_tokens, response.usage.output_tokens);

    writer.set_status(status);
    match info.relay_format {
        RelayFormat::Claude => {
            writer.set_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            writer.write_bytes(body).await?;
        }
        RelayFormat::OpenAI => {
            writer
                .write_json(&response_claude_to_openai(&response, &info.origin_model_name))
                .await?;
        }
    }
    Ok(usage)
}
