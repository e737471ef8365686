//! # Rerank 响应处理
//!
//! 输出统一为 Jina 形态。Xinference 响应需要转换并按请求回填文档，用量取提示词估算值。

use axum::http::StatusCode;
use tracing::debug;

use crate::dto::openai::Usage;
use crate::dto::rerank::{RerankRequest, RerankResponse, RerankResult};
use crate::relay::channel::api_request::UpstreamResponse;
use crate::relay::channel::xinference::dto::XinRerankResponse;
use crate::relay::constant::ChannelType;
use crate::relay::error::{OpenAIErrorWithStatusCode, openai_error_wrapper};
use crate::relay::helper::ClientWriter;
use crate::relay::info::RelayInfo;

/// 记录回填所需的请求信息并改写模型名
pub fn prepare_rerank_request(info: &mut RelayInfo, request: &mut RerankRequest) {
    info.return_documents = request.return_documents();
    info.documents.clone_from(&request.documents);
    request.model.clone_from(&info.upstream_model_name);
}

/// Xinference 响应 -> Jina 形态
pub fn xinference_to_jina(response: XinRerankResponse, info: &RelayInfo) -> RerankResponse {
    let results = response
        .results
        .into_iter()
        .map(|result| {
            let document = if !info.return_documents {
                None
            } else if result.document_missing() {
                info.documents.get(result.index).cloned()
            } else {
                result.document
            };
            RerankResult {
                index: result.index,
                relevance_score: result.relevance_score,
                document,
            }
        })
        .collect();
    RerankResponse {
        results,
        usage: Usage {
            prompt_tokens: info.prompt_tokens,
            completion_tokens: 0,
            total_tokens: info.prompt_tokens,
        },
    }
}

pub async fn rerank_handler(
    resp: UpstreamResponse,
    info: &RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let unmarshal_failed = |e: serde_json::Error| {
        openai_error_wrapper(e, "unmarshal_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    };
    let body = resp.bytes().await.map_err(|e| {
        openai_error_wrapper(e, "read_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    debug!(
        component = "relay.rerank",
        request_id = %info.request_id,
        body = %String::from_utf8_lossy(&body),
        "rerank 上游响应"
    );

    let response = if info.channel_type == ChannelType::Xinference {
        let xin: XinRerankResponse = serde_json::from_slice(&body).map_err(unmarshal_failed)?;
        xinference_to_jina(xin, info)
    } else {
        let mut jina: RerankResponse = serde_json::from_slice(&body).map_err(unmarshal_failed)?;
        jina.usage.prompt_tokens = jina.usage.total_tokens;
        jina
    };

    writer.set_status(StatusCode::OK);
    writer.write_json(&response).await?;
    Ok(response.usage)
}
