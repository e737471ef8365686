//! # Jina 渠道

use async_trait::async_trait;
use axum::http::HeaderMap;

use super::openai::{handler, set_bearer};
use crate::dto::openai::{EmbeddingRequest, GeneralOpenAIRequest, Usage};
use crate::dto::rerank::RerankRequest;
use crate::relay::adaptor::{Adaptor, RequestBody, request_is_nil};
use crate::relay::channel::api_request::UpstreamResponse;
use crate::relay::common_handler::{prepare_rerank_request, rerank_handler};
use crate::relay::constant::RelayMode;
use crate::relay::error::{OpenAIErrorWithStatusCode, not_implemented};
use crate::relay::helper::ClientWriter;
use crate::relay::info::{ClientContext, RelayInfo};

pub const MODEL_LIST: &[&str] = &[
    "jina-clip-v1",
    "jina-reranker-v2-base-multilingual",
    "jina-embeddings-v3",
];

pub const CHANNEL_NAME: &str = "jina";

#[derive(Debug, Default, Clone, Copy)]
pub struct JinaAdaptor;

#[async_trait]
impl Adaptor for JinaAdaptor {
    fn get_request_url(&self, info: &RelayInfo) -> Result<String, OpenAIErrorWithStatusCode> {
        match info.relay_mode {
            RelayMode::Rerank => Ok(format!("{}/v1/rerank", info.base_url)),
            RelayMode::Embeddings => Ok(format!("{}/v1/embeddings", info.base_url)),
            other => Err(not_implemented(other.as_str())),
        }
    }

    fn setup_request_header(&self, _ctx: &ClientContext, headers: &mut HeaderMap, info: &RelayInfo) {
        set_bearer(headers, &info.api_key);
    }

    fn convert_openai_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        request: Option<GeneralOpenAIRequest>,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        let mut request = request.ok_or_else(request_is_nil)?;
        request.model.clone_from(&info.upstream_model_name);
        RequestBody::json(&request)
    }

    fn convert_embedding_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        mut request: EmbeddingRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        request.model.clone_from(&info.upstream_model_name);
        RequestBody::json(&request)
    }

    fn convert_rerank_request(
        &self,
        info: &mut RelayInfo,
        mut request: RerankRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        prepare_rerank_request(info, &mut request);
        RequestBody::json(&request)
    }

    async fn do_response(
        &self,
        _ctx: &ClientContext,
        resp: UpstreamResponse,
        info: &mut RelayInfo,
        writer: &mut ClientWriter,
    ) -> Result<Usage, OpenAIErrorWithStatusCode> {
        match info.relay_mode {
            RelayMode::Rerank => rerank_handler(resp, info, writer).await,
            RelayMode::Embeddings => handler::embedding_handler(resp, info, writer).await,
            other => Err(not_implemented(other.as_str())),
        }
    }

    fn model_list(&self) -> &'static [&'static str] {
        MODEL_LIST
    }

    fn channel_name(&self) -> &'static str {
        CHANNEL_NAME
    }
}
