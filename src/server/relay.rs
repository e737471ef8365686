//! # 同步转发路由
//!
//! 解析入站请求、选择渠道与适配器、发起上游调用并把响应写回客户端。
//! 流式请求立即返回 SSE 响应头，转换在独立任务中逐帧进行。

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use super::state::AppState;
use crate::dto::claude::ClaudeRequest;
use crate::dto::openai::{
    AudioRequest, EmbeddingRequest, GeneralOpenAIRequest, ImageRequest, ModelEntry,
    OpenAIResponsesRequest, Usage,
};
use crate::dto::rerank::RerankRequest;
use crate::notification::NOTIFY_CHANNEL_UPDATE;
use crate::relay::adaptor::{Adaptor, RequestBody};
use crate::relay::channel::api_request::UpstreamResponse;
use crate::relay::constant::{RelayFormat, RelayMode};
use crate::relay::error::{
    OpenAIErrorWithStatusCode, hide_upstream_message, openai_error_wrapper_local, relay_error_handler,
    reset_status_code,
};
use crate::relay::helper::{ClientWriter, event_data, event_stream_headers, object_data};
use crate::relay::info::{ClientContext, RelayInfo};
use crate::relay::registry::get_adaptor;
use crate::utils::token_counter::estimate_tokens;

/// 指定渠道的请求头
pub const CHANNEL_ID_HEADER: &str = "x-channel-id";

/// 图像请求未指定模型时使用
const DEFAULT_IMAGE_MODEL: &str = "dall-e-2";

/// 已解析的入站请求
#[derive(Debug)]
enum InboundRequest {
    Chat(GeneralOpenAIRequest),
    Claude(ClaudeRequest),
    Embedding(EmbeddingRequest),
    Image(ImageRequest),
    Rerank(RerankRequest),
    Audio(AudioRequest),
    Responses(OpenAIResponsesRequest),
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, OpenAIErrorWithStatusCode> {
    serde_json::from_slice(body)
        .map_err(|e| openai_error_wrapper_local(e, "invalid_request", StatusCode::BAD_REQUEST))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl InboundRequest {
    fn parse(mode: RelayMode, format: RelayFormat, body: &[u8]) -> Result<Self, OpenAIErrorWithStatusCode> {
        let request = match (format, mode) {
            (RelayFormat::Claude, _) => Self::Claude(parse_json(body)?),
            (_, RelayMode::ChatCompletions | RelayMode::Completions) => Self::Chat(parse_json(body)?),
            (_, RelayMode::Embeddings) => Self::Embedding(parse_json(body)?),
            (_, RelayMode::ImagesGenerations) => {
                let mut request: ImageRequest = parse_json(body)?;
                if request.model.is_empty() {
                    request.model = DEFAULT_IMAGE_MODEL.to_string();
                }
                Self::Image(request)
            }
            (_, RelayMode::Rerank) => Self::Rerank(parse_json(body)?),
            (_, RelayMode::AudioSpeech) => Self::Audio(parse_json(body)?),
            (_, RelayMode::Responses) => Self::Responses(parse_json(body)?),
        };
        if request.model().is_empty() {
            return Err(openai_error_wrapper_local(
                "model is required",
                "invalid_request",
                StatusCode::BAD_REQUEST,
            ));
        }
        Ok(request)
    }

    fn model(&self) -> &str {
        match self {
            Self::Chat(r) => &r.model,
            Self::Claude(r) => &r.model,
            Self::Embedding(r) => &r.model,
            Self::Image(r) => &r.model,
            Self::Rerank(r) => &r.model,
            Self::Audio(r) => &r.model,
            Self::Responses(r) => &r.model,
        }
    }

    fn is_stream(&self) -> bool {
        match self {
            Self::Chat(r) => r.is_stream(),
            Self::Claude(r) => r.is_stream(),
            Self::Responses(r) => r.stream.unwrap_or(false),
            _ => false,
        }
    }

    fn include_usage(&self) -> bool {
        matches!(self, Self::Chat(r) if r.include_usage())
    }

    /// 用于估算提示词 token 的文本
    fn prompt_text(&self) -> String {
        match self {
            Self::Chat(r) => r.prompt_text(),
            Self::Claude(r) => r.prompt_text(),
            Self::Embedding(r) => r.input_list().join("\n"),
            Self::Image(r) => r.prompt.clone(),
            Self::Rerank(r) => r.prompt_text(),
            Self::Audio(r) => r.input.clone(),
            Self::Responses(r) => value_text(&r.input),
        }
    }

    fn convert(
        self,
        adaptor: &dyn Adaptor,
        ctx: &ClientContext,
        info: &mut RelayInfo,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        match self {
            Self::Chat(r) => adaptor.convert_openai_request(ctx, info, Some(r)),
            Self::Claude(r) => adaptor.convert_claude_request(ctx, info, r),
            Self::Embedding(r) => adaptor.convert_embedding_request(ctx, info, r),
            Self::Image(r) => adaptor.convert_image_request(ctx, info, r),
            Self::Rerank(r) => adaptor.convert_rerank_request(info, r),
            Self::Audio(r) => adaptor.convert_audio_request(ctx, info, r),
            Self::Responses(r) => adaptor.convert_openai_responses_request(ctx, info, r),
        }
    }
}

/// 解析 `X-Channel-Id`
pub fn pinned_channel(headers: &HeaderMap) -> Result<Option<i64>, OpenAIErrorWithStatusCode> {
    let Some(value) = headers.get(CHANNEL_ID_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(Some)
        .ok_or_else(|| {
            openai_error_wrapper_local("invalid channel id", "invalid_request", StatusCode::BAD_REQUEST)
        })
}

/// OpenAI 格式入口，操作类型由路径决定
pub async fn relay_openai(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(mode) = RelayMode::from_path(uri.path()) else {
        return openai_error_wrapper_local("unknown relay path", "not_found", StatusCode::NOT_FOUND)
            .into_response();
    };
    relay(state, mode, RelayFormat::OpenAI, headers, body).await
}

/// Claude 格式入口（`/v1/messages`）
pub async fn relay_claude(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    relay(state, RelayMode::ChatCompletions, RelayFormat::Claude, headers, body).await
}

async fn relay(
    state: AppState,
    mode: RelayMode,
    format: RelayFormat,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match relay_inner(&state, mode, format, headers, &body).await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                component = "relay.server",
                mode = mode.as_str(),
                status = err.status_code,
                code = %err.code_str(),
                local = err.local_error,
                message = %err.error.message,
                "转发失败"
            );
            error_response(err, format)
        }
    }
}

/// 按客户端协议输出错误信封
pub fn error_response(err: OpenAIErrorWithStatusCode, format: RelayFormat) -> Response {
    match format {
        RelayFormat::OpenAI => err.into_response(),
        RelayFormat::Claude => err.to_claude().into_response(),
    }
}

/// 非本地错误：先按上游状态码隐藏文案，再重映射对外状态码
fn remap_upstream(mut err: OpenAIErrorWithStatusCode, info: &RelayInfo) -> OpenAIErrorWithStatusCode {
    if !err.local_error {
        hide_upstream_message(&mut err, info.hide_upstream_error);
        reset_status_code(&mut err, info.status_code_mapping.as_deref());
    }
    err
}

async fn relay_inner(
    state: &AppState,
    mode: RelayMode,
    format: RelayFormat,
    headers: HeaderMap,
    body: &[u8],
) -> Result<Response, OpenAIErrorWithStatusCode> {
    let config = state.config();
    let request = InboundRequest::parse(mode, format, body)?;
    let pinned = pinned_channel(&headers)?;

    let channel = config.select_channel(request.model(), pinned).ok_or_else(|| {
        openai_error_wrapper_local(
            format!("no available channel for model {}", request.model()),
            "model_not_found",
            StatusCode::SERVICE_UNAVAILABLE,
        )
    })?;
    let api_type = channel.channel_type.api_type().ok_or_else(|| {
        openai_error_wrapper_local(
            format!("channel {} does not serve {}", channel.id, mode.as_str()),
            "invalid_channel",
            StatusCode::BAD_REQUEST,
        )
    })?;
    let mut adaptor = get_adaptor(api_type).ok_or_else(|| {
        openai_error_wrapper_local("adaptor not registered", "invalid_api_type", StatusCode::BAD_REQUEST)
    })?;

    let mut info = RelayInfo::new(channel, api_type, mode, format, request.model())
        .with_relay_config(&config.relay);
    info.is_stream = request.is_stream();
    info.should_include_usage = request.include_usage();
    info.prompt_tokens = estimate_tokens(&request.prompt_text());
    adaptor.init(&info);

    let ctx = ClientContext::new(headers, state.http().clone());
    let payload = request.convert(adaptor.as_ref(), &ctx, &mut info)?;
    let resp = adaptor
        .do_request(&ctx, &info, payload)
        .await
        .map_err(|e| remap_upstream(e, &info))?;

    if !resp.is_success() {
        let err = relay_error_handler(
            resp,
            config.relay.show_body_when_fail,
            config.relay.hide_upstream_error,
        )
        .await;
        if err.status_code == StatusCode::UNAUTHORIZED.as_u16() {
            notify_key_rejected(state, &info);
        }
        return Err(remap_upstream(err, &info));
    }

    if info.is_stream {
        return Ok(stream_response(adaptor, ctx, info, resp, config.relay.stream_buffer));
    }

    let mut writer = ClientWriter::buffered();
    let usage = adaptor
        .do_response(&ctx, resp, &mut info, &mut writer)
        .await
        .map_err(|e| remap_upstream(e, &info))?;
    log_usage(&info, usage);
    Ok(writer.into_response())
}

/// 上游拒绝渠道密钥时通知管理员，不阻塞当前请求
fn notify_key_rejected(state: &AppState, info: &RelayInfo) {
    let notify = state.notify().clone();
    let content = format!(
        "渠道「{}」（#{}）的密钥被上游拒绝（401），请检查渠道配置",
        info.channel_name, info.channel_id
    );
    tokio::spawn(async move {
        notify
            .notify_root_user(NOTIFY_CHANNEL_UPDATE, "渠道密钥失效", &content)
            .await;
    });
}

fn stream_response(
    adaptor: Box<dyn Adaptor>,
    ctx: ClientContext,
    mut info: RelayInfo,
    resp: UpstreamResponse,
    buffer: usize,
) -> Response {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    tokio::spawn(async move {
        let mut writer = ClientWriter::streaming(tx);
        match adaptor.do_response(&ctx, resp, &mut info, &mut writer).await {
            Ok(usage) => log_usage(&info, usage),
            Err(mut err) => {
                hide_upstream_message(&mut err, info.hide_upstream_error);
                warn!(
                    component = "relay.stream",
                    request_id = %info.request_id,
                    channel_id = info.channel_id,
                    sent = info.send_response_count,
                    status = err.status_code,
                    message = %err.error.message,
                    "流式转发中断"
                );
                write_stream_error(&mut writer, info.relay_format, &err).await;
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().extend(event_stream_headers());
    response
}

/// 响应头已提交后的错误以流帧形式告知客户端
async fn write_stream_error(writer: &mut ClientWriter, format: RelayFormat, err: &OpenAIErrorWithStatusCode) {
    let written = match format {
        RelayFormat::OpenAI => object_data(writer, &json!({ "error": err.error })).await,
        RelayFormat::Claude => {
            let data = json!({ "type": "error", "error": err.to_claude().error }).to_string();
            event_data(writer, "error", &data).await
        }
    };
    if written.is_err() {
        warn!(component = "relay.stream", "客户端已断开，错误帧未送达");
    }
}

fn log_usage(info: &RelayInfo, usage: Usage) {
    let first_response_ms = info
        .first_response_time
        .map(|t| t.duration_since(info.start_time).as_millis());
    info!(
        component = "relay.usage",
        request_id = %info.request_id,
        channel_id = info.channel_id,
        mode = info.relay_mode.as_str(),
        model = %info.origin_model_name,
        upstream_model = %info.upstream_model_name,
        stream = info.is_stream,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        first_response_ms = ?first_response_ms,
        elapsed_ms = info.start_time.elapsed().as_millis(),
        "转发完成"
    );
}

/// `GET /v1/models`
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let config = state.config();
    let data: Vec<ModelEntry> = config
        .all_models()
        .into_iter()
        .map(|id| {
            let owned_by = config
                .select_channel(&id, None)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            ModelEntry {
                id,
                object: "model".to_string(),
                created: 0,
                owned_by,
            }
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}
