//! # OpenAI 兼容渠道
//!
//! OpenAI 官方接口与自定义 OpenAI 兼容上游共用此适配器。

pub mod handler;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header};

use crate::dto::claude::ClaudeRequest;
use crate::dto::openai::{
    AudioRequest, EmbeddingRequest, GeneralOpenAIRequest, ImageRequest, OpenAIResponsesRequest,
    StreamOptions, Usage,
};
use crate::relay::adaptor::{Adaptor, RequestBody, request_is_nil};
use crate::relay::channel::api_request::UpstreamResponse;
use crate::relay::constant::RelayMode;
use crate::relay::convert::request_claude_to_openai;
use crate::relay::error::{OpenAIErrorWithStatusCode, not_implemented};
use crate::relay::helper::ClientWriter;
use crate::relay::info::{ClientContext, RelayInfo};

pub const MODEL_LIST: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1",
    "gpt-4.1-mini",
    "o3-mini",
    "text-embedding-3-small",
    "text-embedding-3-large",
    "dall-e-3",
    "tts-1",
];

pub const CHANNEL_NAME: &str = "openai";

/// Bearer 鉴权头
pub fn set_bearer(headers: &mut HeaderMap, key: &str) {
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
        headers.insert(header::AUTHORIZATION, value);
    }
}

/// 流式请求强制上游在末尾返回用量
pub fn force_stream_usage(request: &mut GeneralOpenAIRequest) {
    if request.is_stream() {
        request.stream_options = Some(StreamOptions { include_usage: true });
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAIAdaptor;

#[async_trait]
impl Adaptor for OpenAIAdaptor {
    fn get_request_url(&self, info: &RelayInfo) -> Result<String, OpenAIErrorWithStatusCode> {
        let path = match info.relay_mode {
            RelayMode::ChatCompletions => "/v1/chat/completions",
            RelayMode::Completions => "/v1/completions",
            RelayMode::Embeddings => "/v1/embeddings",
            RelayMode::ImagesGenerations => "/v1/images/generations",
            RelayMode::AudioSpeech => "/v1/audio/speech",
            RelayMode::Responses => "/v1/responses",
            RelayMode::Rerank => return Err(not_implemented("rerank")),
        };
        Ok(format!("{}{path}", info.base_url))
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
        force_stream_usage(&mut request);
        RequestBody::json(&request)
    }

    fn convert_claude_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        request: ClaudeRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        let request = request_claude_to_openai(&request, &info.upstream_model_name);
        RequestBody::json(&request)
    }

    fn convert_image_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        mut request: ImageRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
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

    fn convert_audio_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        mut request: AudioRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        request.model.clone_from(&info.upstream_model_name);
        RequestBody::json(&request)
    }

    fn convert_openai_responses_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        mut request: OpenAIResponsesRequest,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        request.model.clone_from(&info.upstream_model_name);
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
            RelayMode::ChatCompletions | RelayMode::Completions if info.is_stream => {
                handler::oai_stream_handler(resp, info, writer).await
            }
            RelayMode::ChatCompletions | RelayMode::Completions => {
                handler::openai_handler(resp, info, writer).await
            }
            RelayMode::Embeddings => handler::embedding_handler(resp, info, writer).await,
            RelayMode::ImagesGenerations => handler::image_handler(resp, info, writer).await,
            RelayMode::AudioSpeech => handler::audio_handler(resp, info, writer).await,
            RelayMode::Responses if info.is_stream => {
                handler::responses_stream_handler(resp, info, writer).await
            }
            RelayMode::Responses => handler::responses_handler(resp, info, writer).await,
            RelayMode::Rerank => Err(not_implemented("rerank")),
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
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(RelayMode::ChatCompletions, "/v1/chat/completions")]
    #[case(RelayMode::Completions, "/v1/completions")]
    #[case(RelayMode::Embeddings, "/v1/embeddings")]
    #[case(RelayMode::ImagesGenerations, "/v1/images/generations")]
    #[case(RelayMode::AudioSpeech, "/v1/audio/speech")]
    #[case(RelayMode::Responses, "/v1/responses")]
    fn test_request_url(#[case] mode: RelayMode, #[case] path: &str) {
        let info = ChannelFixture::new(ChannelType::OpenAI)
            .base_url("https://up.example.com/")
            .relay_info(mode, RelayFormat::OpenAI, "gpt-4o");
        let url = OpenAIAdaptor.get_request_url(&info).unwrap();
        assert_eq!(url, format!("https://up.example.com{path}"));
    }

    #[test]
    fn test_rerank_not_implemented() {
        let info = ChannelFixture::new(ChannelType::OpenAI).relay_info(
            RelayMode::Rerank,
            RelayFormat::OpenAI,
            "gpt-4o",
        );
        let err = OpenAIAdaptor.get_request_url(&info).unwrap_err();
        assert_eq!(err.status_code, 501);
    }

    #[test]
    fn test_convert_maps_model_and_forces_usage() {
        let mut info = ChannelFixture::new(ChannelType::OpenAI)
            .mapping("gpt", "gpt-4o-2024-08-06")
            .relay_info(RelayMode::ChatCompletions, RelayFormat::OpenAI, "gpt");
        let request: GeneralOpenAIRequest = serde_json::from_value(json!({
            "model": "gpt",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        let body = OpenAIAdaptor
            .convert_openai_request(&client_context(), &mut info, Some(request))
            .unwrap();
        let value = body.as_json().unwrap();
        assert_eq!(value["model"], "gpt-4o-2024-08-06");
        assert_eq!(value["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_convert_nil_request() {
        let mut info = ChannelFixture::new(ChannelType::OpenAI).relay_info(
            RelayMode::ChatCompletions,
            RelayFormat::OpenAI,
            "gpt",
        );
        let err = OpenAIAdaptor
            .convert_openai_request(&client_context(), &mut info, None)
            .unwrap_err();
        assert_eq!(err.status_code, 400);
    }

    #[test]
    fn test_bearer_header() {
        let info = ChannelFixture::new(ChannelType::OpenAI).relay_info(
            RelayMode::ChatCompletions,
            RelayFormat::OpenAI,
            "gpt",
        );
        let mut headers = HeaderMap::new();
        OpenAIAdaptor.setup_request_header(&client_context(), &mut headers, &info);
        assert_eq!(headers[header::AUTHORIZATION], "Bearer sk-test");
    }
}
