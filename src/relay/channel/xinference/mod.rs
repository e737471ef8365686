//! # Xinference 渠道
//!
//! OpenAI 兼容接口，rerank 使用自有响应形态。

pub mod dto;

use async_trait::async_trait;
use axum::http::HeaderMap;

use super::openai::{force_stream_usage, handler, set_bearer};
use crate::dto::openai::{EmbeddingRequest, GeneralOpenAIRequest, Usage};
use crate::dto::rerank::RerankRequest;
use crate::relay::adaptor::{Adaptor, RequestBody, request_is_nil};
use crate::relay::channel::api_request::UpstreamResponse;
use crate::relay::common_handler::{prepare_rerank_request, rerank_handler};
use crate::relay::constant::RelayMode;
use crate::relay::error::{OpenAIErrorWithStatusCode, not_implemented};
use crate::relay::helper::ClientWriter;
use crate::relay::info::{ClientContext, RelayInfo};

pub const MODEL_LIST: &[&str] = &["bge-reranker-v2-m3", "jina-reranker-v2", "qwen2.5-instruct"];

pub const CHANNEL_NAME: &str = "xinference";

#[derive(Debug, Default, Clone, Copy)]
pub struct XinferenceAdaptor;

#[async_trait]
impl Adaptor for XinferenceAdaptor {
    fn get_request_url(&self, info: &RelayInfo) -> Result<String, OpenAIErrorWithStatusCode> {
        let path = match info.relay_mode {
            RelayMode::ChatCompletions => "/v1/chat/completions",
            RelayMode::Completions => "/v1/completions",
            RelayMode::Embeddings => "/v1/embeddings",
            RelayMode::Rerank => "/v1/rerank",
            other => return Err(not_implemented(other.as_str())),
        };
        Ok(format!("{}{path}", info.base_url))
    }

    fn setup_request_header(&self, _ctx: &ClientContext, headers: &mut HeaderMap, info: &RelayInfo) {
        if !info.api_key.is_empty() {
            set_bearer(headers, &info.api_key);
        }
    }

    fn convert_openai_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        request: Option<GeneralOpenAIRequest>,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        let mut request = request.ok_or_else(request_is_nil)?;
        request.model.clone_from(&info.upstream_model_name);
        force_stream_usage(&mut request);
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
            RelayMode::ChatCompletions | RelayMode::Completions if info.is_stream => {
                handler::oai_stream_handler(resp, info, writer).await
            }
            RelayMode::ChatCompletions | RelayMode::Completions => {
                handler::openai_handler(resp, info, writer).await
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::constant::{ChannelType, RelayFormat};
    use crate::testing::{ChannelFixture, client_context};

    #[test]
    fn test_urls() {
        let fixture = ChannelFixture::new(ChannelType::Xinference).base_url("http://xin:9997");
        let url = |mode| XinferenceAdaptor.get_request_url(&fixture.relay_info(mode, RelayFormat::OpenAI, "m"));
        assert_eq!(url(RelayMode::Rerank).unwrap(), "http://xin:9997/v1/rerank");
        assert_eq!(url(RelayMode::Completions).unwrap(), "http://xin:9997/v1/completions");
        assert_eq!(url(RelayMode::AudioSpeech).unwrap_err().status_code, 501);
    }

    #[test]
    fn test_empty_key_sends_no_auth() {
        let info = ChannelFixture::new(ChannelType::Xinference)
            .key("")
            .relay_info(RelayMode::Rerank, RelayFormat::OpenAI, "m");
        let mut headers = HeaderMap::new();
        XinferenceAdaptor.setup_request_header(&client_context(), &mut headers, &info);
        assert!(headers.is_empty());
    }
}
