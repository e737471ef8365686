//! # 阿里云 DashScope 渠道
//!
//! 对话走兼容模式接口，嵌入与图像合成走原生接口。

pub mod dto;
pub mod image;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode};

use self::dto::{AliEmbeddingInput, AliEmbeddingParameters, AliEmbeddingRequest, AliEmbeddingResponse};
use super::openai::{force_stream_usage, handler, set_bearer};
use crate::dto::openai::{
    EmbeddingData, EmbeddingRequest, EmbeddingResponse, GeneralOpenAIRequest, ImageRequest, Usage,
};
use crate::relay::adaptor::{Adaptor, RequestBody, request_is_nil};
use crate::relay::channel::api_request::UpstreamResponse;
use crate::relay::constant::RelayMode;
use crate::relay::error::{OpenAIErrorWithStatusCode, not_implemented, openai_error_wrapper};
use crate::relay::helper::ClientWriter;
use crate::relay::info::{ClientContext, RelayInfo};

pub const MODEL_LIST: &[&str] = &[
    "qwen-turbo",
    "qwen-plus",
    "qwen-max",
    "qwen-max-longcontext",
    "text-embedding-v1",
    "text-embedding-v3",
    "ali-stable-diffusion-xl",
    "ali-stable-diffusion-v1.5",
    "wanx-v1",
];

pub const CHANNEL_NAME: &str = "ali";

/// DashScope 不接受 `top_p >= 1`
const MAX_TOP_P: f64 = 0.999;

/// OpenAI 请求 -> DashScope 兼容模式请求
pub fn request_openai_to_ali(mut request: GeneralOpenAIRequest, model: &str) -> GeneralOpenAIRequest {
    request.model = model.to_string();
    if request.top_p.is_some_and(|p| p >= 1.0) {
        request.top_p = Some(MAX_TOP_P);
    }
    force_stream_usage(&mut request);
    request
}

pub fn embedding_request_openai_to_ali(request: &EmbeddingRequest, model: &str) -> AliEmbeddingRequest {
    AliEmbeddingRequest {
        model: model.to_string(),
        input: AliEmbeddingInput {
            texts: request.input_list(),
        },
        parameters: AliEmbeddingParameters::default(),
    }
}

pub fn embedding_response_ali_to_openai(response: AliEmbeddingResponse, model: &str) -> EmbeddingResponse {
    let tokens = response.usage.total_tokens;
    EmbeddingResponse {
        object: "list".to_string(),
        data: response
            .output
            .embeddings
            .into_iter()
            .map(|e| EmbeddingData {
                object: "embedding".to_string(),
                index: e.text_index,
                embedding: e.embedding,
            })
            .collect(),
        model: model.to_string(),
        usage: Usage {
            prompt_tokens: tokens,
            completion_tokens: 0,
            total_tokens: tokens,
        },
    }
}

async fn ali_embedding_handler(
    resp: UpstreamResponse,
    info: &RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let status = resp.status;
    let body = resp.bytes().await.map_err(|e| {
        openai_error_wrapper(e, "read_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    let response: AliEmbeddingResponse = serde_json::from_slice(&body).map_err(|e| {
        openai_error_wrapper(e, "unmarshal_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    if response.error.is_error() {
        return Err(image::ali_error(&response.error, status));
    }
    let response = embedding_response_ali_to_openai(response, &info.upstream_model_name);
    let usage = response.usage;
    writer.write_json(&response).await?;
    Ok(usage)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AliAdaptor;

#[async_trait]
impl Adaptor for AliAdaptor {
    fn get_request_url(&self, info: &RelayInfo) -> Result<String, OpenAIErrorWithStatusCode> {
        let path = match info.relay_mode {
            RelayMode::Embeddings => "/api/v1/services/embeddings/text-embedding/text-embedding",
            RelayMode::ImagesGenerations => "/api/v1/services/aigc/text2image/image-synthesis",
            RelayMode::ChatCompletions => "/compatible-mode/v1/chat/completions",
            other => return Err(not_implemented(other.as_str())),
        };
        Ok(format!("{}{path}", info.base_url))
    }

    fn setup_request_header(&self, ctx: &ClientContext, headers: &mut HeaderMap, info: &RelayInfo) {
        set_bearer(headers, &info.api_key);
        if info.is_stream {
            headers.insert("x-dashscope-sse", HeaderValue::from_static("enable"));
        }
        if info.relay_mode == RelayMode::ImagesGenerations {
            headers.insert("x-dashscope-async", HeaderValue::from_static("enable"));
        }
        if let Some(plugin) = ctx.plugin.as_deref().and_then(|p| HeaderValue::from_str(p).ok()) {
            headers.insert("x-dashscope-plugin", plugin);
        }
    }

    fn convert_openai_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        request: Option<GeneralOpenAIRequest>,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        let request = request.ok_or_else(request_is_nil)?;
        RequestBody::json(&request_openai_to_ali(request, &info.upstream_model_name))
    }

    fn convert_image_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        request: ImageRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        info.image_response_format.clone_from(&request.response_format);
        RequestBody::json(&image::image_request_openai_to_ali(&request, &info.upstream_model_name))
    }

    fn convert_embedding_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        request: EmbeddingRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        RequestBody::json(&embedding_request_openai_to_ali(&request, &info.upstream_model_name))
    }

    async fn do_response(
        &self,
        ctx: &ClientContext,
        resp: UpstreamResponse,
        info: &mut RelayInfo,
        writer: &mut ClientWriter,
    ) -> Result<Usage, OpenAIErrorWithStatusCode> {
        match info.relay_mode {
            RelayMode::ImagesGenerations => image::ali_image_handler(ctx, resp, info, writer).await,
            RelayMode::Embeddings => ali_embedding_handler(resp, info, writer).await,
            _ if info.is_stream => handler::oai_stream_handler(resp, info, writer).await,
            _ => handler::openai_handler(resp, info, writer).await,
        }
    }

    fn model_list(&self) -> &'static [&'static str] {
        MODEL_LIST
    }

    fn channel_name(&self) -> &'static str {
        CHANNEL_NAME
    }
}
