//! # 渠道适配器契约
//!
//! 每个上游厂商实现一次 [`Adaptor`]：把规范化请求转换为厂商报文、构造出站请求、
//! 再把厂商响应转换回客户端协议。适配器本身无状态，每个请求从注册表新建一个实例，
//! 请求级状态全部放在 [`RelayInfo`] 中。

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::channel::api_request::{RelayClient, UpstreamResponse, do_api_request, do_task_api_request};
use super::error::{OpenAIErrorWithStatusCode, TaskError, not_implemented, openai_error_wrapper_local};
use super::helper::ClientWriter;
use super::info::{ClientContext, RelayInfo, TaskRelayInfo};
use crate::dto::claude::ClaudeRequest;
use crate::dto::openai::{
    AudioRequest, EmbeddingRequest, GeneralOpenAIRequest, ImageRequest, OpenAIResponsesRequest, Usage,
};
use crate::dto::rerank::RerankRequest;
use crate::error::RelayError;

/// 转换后的出站请求体
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Raw { content_type: String, body: Bytes },
}

impl RequestBody {
    /// 序列化任意厂商报文
    pub fn json<T: Serialize>(value: &T) -> Result<Self, OpenAIErrorWithStatusCode> {
        serde_json::to_value(value).map(Self::Json).map_err(|e| {
            openai_error_wrapper_local(e, "convert_request_failed", StatusCode::INTERNAL_SERVER_ERROR)
        })
    }

    pub fn content_type(&self) -> &str {
        match self {
            Self::Json(_) => "application/json",
            Self::Raw { content_type, .. } => content_type,
        }
    }

    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw { .. } => None,
        }
    }

    pub fn into_bytes(self) -> Result<Bytes, OpenAIErrorWithStatusCode> {
        match self {
            Self::Json(value) => serde_json::to_vec(&value).map(Bytes::from).map_err(|e| {
                openai_error_wrapper_local(e, "marshal_request_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
            }),
            Self::Raw { body, .. } => Ok(body),
        }
    }
}

/// 缺失请求体属于本地校验失败，不会转发
pub fn request_is_nil() -> OpenAIErrorWithStatusCode {
    openai_error_wrapper_local("request is nil", "invalid_request", StatusCode::BAD_REQUEST)
}

/// 同步转发适配器
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// 记录渠道类型等静态信息，不会失败
    fn init(&mut self, _info: &RelayInfo) {}

    /// 上游完整地址；不支持的操作返回 `not_implemented`
    fn get_request_url(&self, info: &RelayInfo) -> Result<String, OpenAIErrorWithStatusCode>;

    /// 鉴权头与厂商专有头
    fn setup_request_header(&self, ctx: &ClientContext, headers: &mut HeaderMap, info: &RelayInfo);

    fn convert_openai_request(
        &self,
        ctx: &ClientContext,
        info: &mut RelayInfo,
        request: Option<GeneralOpenAIRequest>,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode>;

    fn convert_claude_request(
        &self,
        _ctx: &ClientContext,
        _info: &mut RelayInfo,
        _request: ClaudeRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        Err(not_implemented("claude request"))
    }

    fn convert_image_request(
        &self,
        _ctx: &ClientContext,
        _info: &mut RelayInfo,
        _request: ImageRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        Err(not_implemented("image generation"))
    }

    fn convert_embedding_request(
        &self,
        _ctx: &ClientContext,
        _info: &mut RelayInfo,
        _request: EmbeddingRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        Err(not_implemented("embeddings"))
    }

    fn convert_rerank_request(
        &self,
        _info: &mut RelayInfo,
        _request: RerankRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        Err(not_implemented("rerank"))
    }

    fn convert_audio_request(
        &self,
        _ctx: &ClientContext,
        _info: &mut RelayInfo,
        _request: AudioRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        Err(not_implemented("audio speech"))
    }

    fn convert_openai_responses_request(
        &self,
        _ctx: &ClientContext,
        _info: &mut RelayInfo,
        _request: OpenAIResponsesRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        Err(not_implemented("responses"))
    }

    /// 发起上游调用
    async fn do_request(
        &self,
        ctx: &ClientContext,
        info: &RelayInfo,
        body: RequestBody,
    ) -> Result<UpstreamResponse, OpenAIErrorWithStatusCode> {
        do_api_request(self, ctx, info, body).await
    }

    /// 按操作类型与流式标志分派响应解码；成功时返回用量
    async fn do_response(
        &self,
        ctx: &ClientContext,
        resp: UpstreamResponse,
        info: &mut RelayInfo,
        writer: &mut ClientWriter,
    ) -> Result<Usage, OpenAIErrorWithStatusCode>;

    fn model_list(&self) -> &'static [&'static str];

    fn channel_name(&self) -> &'static str;
}

/// 异步任务适配器（提交 -> 查询）
#[async_trait]
pub trait TaskAdaptor: Send + Sync {
    fn init(&mut self, _info: &TaskRelayInfo) {}

    /// 校验请求体，写入动作与已校验的任务请求
    fn validate_request_and_set_action(
        &self,
        action: &str,
        body: &[u8],
        info: &mut TaskRelayInfo,
    ) -> Result<(), TaskError>;

    fn build_request_url(&self, info: &TaskRelayInfo) -> Result<String, TaskError>;

    fn build_request_header(&self, ctx: &ClientContext, headers: &mut HeaderMap, info: &TaskRelayInfo);

    fn build_request_body(&self, info: &TaskRelayInfo) -> Result<Bytes, TaskError>;

    async fn do_request(
        &self,
        ctx: &ClientContext,
        info: &TaskRelayInfo,
        body: Bytes,
    ) -> Result<UpstreamResponse, TaskError> {
        do_task_api_request(self, ctx, info, body).await
    }

    /// 解码提交结果；成功时透传上游响应并返回任务ID
    async fn do_response(
        &self,
        resp: UpstreamResponse,
        info: &TaskRelayInfo,
        writer: &mut ClientWriter,
    ) -> Result<String, TaskError>;

    /// 查询任务状态，带独立的截止时间
    async fn fetch_task(
        &self,
        http: &RelayClient,
        base_url: &str,
        key: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<UpstreamResponse, RelayError>;

    fn model_list(&self) -> &'static [&'static str];

    fn channel_name(&self) -> &'static str;
}
