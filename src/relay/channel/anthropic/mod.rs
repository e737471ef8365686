//! # Anthropic 渠道
//!
//! 原生 Messages API。Claude 格式客户端直通，OpenAI 格式客户端在请求与响应两侧转换。

pub mod handler;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};

use crate::dto::claude::ClaudeRequest;
use crate::dto::openai::{GeneralOpenAIRequest, Usage};
use crate::relay::adaptor::{Adaptor, RequestBody, request_is_nil};
use crate::relay::channel::api_request::UpstreamResponse;
use crate::relay::constant::{ANTHROPIC_VERSION, RelayMode};
use crate::relay::convert::request_openai_to_claude;
use crate::relay::error::{OpenAIErrorWithStatusCode, not_implemented};
use crate::relay::helper::ClientWriter;
use crate::relay::info::{ClientContext, RelayInfo};

pub const MODEL_LIST: &[&str] = &[
    "claude-3-5-haiku-20241022",
    "claude-3-5-sonnet-20241022",
    "claude-3-7-sonnet-20250219",
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
];

pub const CHANNEL_NAME: &str = "anthropic";

#[derive(Debug, Default, Clone, Copy)]
pub struct AnthropicAdaptor;

#[async_trait]
impl Adaptor for AnthropicAdaptor {
    fn get_request_url(&self, info: &RelayInfo) -> Result<String, OpenAIErrorWithStatusCode> {
        match info.relay_mode {
            RelayMode::ChatCompletions => Ok(format!("{}/v1/messages", info.base_url)),
            other => Err(not_implemented(other.as_str())),
        }
    }

    fn setup_request_header(&self, ctx: &ClientContext, headers: &mut HeaderMap, info: &RelayInfo) {
        if let Ok(key) = HeaderValue::from_str(&info.api_key) {
            headers.insert("x-api-key", key);
        }
        let version = ctx
            .headers
            .get("anthropic-version")
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert("anthropic-version", version);
        if let Some(beta) = ctx.headers.get("anthropic-beta") {
            headers.insert("anthropic-beta", beta.clone());
        }
    }

    fn convert_openai_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        request: Option<GeneralOpenAIRequest>,
    ) -> Result<RequestBody, OpenAIErrorWithStatusCode> {
        let request = request.ok_or_else(request_is_nil)?;
        RequestBody::json(&request_openai_to_claude(&request, &info.upstream_model_name))
    }

    fn convert_claude_request(
        &self,
        _ctx: &ClientContext,
        info: &mut RelayInfo,
        mut request: ClaudeRequest,
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
        if info.is_stream {
            handler::claude_stream_handler(resp, info, writer).await
        } else {
            handler::claude_handler(resp, info, writer).await
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
    use crate::testing::{ChannelFixture, client_context, client_context_with};
    use serde_json::json;

    fn info(format: RelayFormat) -> RelayInfo {
        ChannelFixture::new(ChannelType::Anthropic)
            .mapping("claude", "claude-3-5-sonnet-20241022")
            .relay_info(RelayMode::ChatCompletions, format, "claude")
    }

    #[test]
    fn test_url_and_headers() {
        let info = info(RelayFormat::Claude);
        assert_eq!(
            AnthropicAdaptor.get_request_url(&info).unwrap(),
            "https://api.anthropic.com/v1/messages"
        );

        let mut headers = HeaderMap::new();
        AnthropicAdaptor.setup_request_header(&client_context(), &mut headers, &info);
        assert_eq!(headers["x-api-key"], "sk-test");
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);

        let ctx = client_context_with(&[("anthropic-beta", "tools-2024-04-04")]);
        let mut headers = HeaderMap::new();
        AnthropicAdaptor.setup_request_header(&ctx, &mut headers, &info);
        assert_eq!(headers["anthropic-beta"], "tools-2024-04-04");
    }

    #[test]
    fn test_embeddings_not_implemented() {
        let info = ChannelFixture::new(ChannelType::Anthropic).relay_info(
            RelayMode::Embeddings,
            RelayFormat::OpenAI,
            "claude",
        );
        assert_eq!(AnthropicAdaptor.get_request_url(&info).unwrap_err().status_code, 501);
    }

    #[test]
    fn test_openai_request_converted() {
        let mut info = info(RelayFormat::OpenAI);
        let request: GeneralOpenAIRequest = serde_json::from_value(json!({
            "model": "claude",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]
        }))
        .unwrap();
        let body = AnthropicAdaptor
            .convert_openai_request(&client_context(), &mut info, Some(request))
            .unwrap();
        let value = body.as_json().unwrap();
        assert_eq!(value["model"], "claude-3-5-sonnet-20241022");
        assert_eq!(value["system"], "be brief");
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn test_claude_request_model_remapped() {
        let mut info = info(RelayFormat::Claude);
        let request: ClaudeRequest = serde_json::from_value(json!({
            "model": "claude",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        let body = AnthropicAdaptor
            .convert_claude_request(&client_context(), &mut info, request)
            .unwrap();
        let value = body.as_json().unwrap();
        assert_eq!(value["model"], "claude-3-5-sonnet-20241022");
        assert_eq!(value["max_tokens"], 64);
    }
}
