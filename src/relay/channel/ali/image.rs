//! # DashScope 图像合成
//!
//! 提交异步任务后按固定间隔轮询 `/api/v1/tasks/{id}`，成功后转换为 OpenAI 图像响应。

use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use super::dto::{
    AliError, AliImageInput, AliImageParameters, AliImageRequest, AliTaskOutput, AliTaskResponse,
    TASK_FAILED, TASK_SUCCEEDED, TASK_UNKNOWN,
};
use crate::dto::openai::{ImageData, ImageRequest, ImageResponse, Usage};
use crate::relay::channel::api_request::UpstreamResponse;
use crate::relay::error::{
    ERROR_TYPE_UPSTREAM, OpenAIError, OpenAIErrorWithStatusCode, openai_error_wrapper,
};
use crate::relay::helper::ClientWriter;
use crate::relay::info::{ClientContext, RelayInfo};

const B64_JSON: &str = "b64_json";

/// OpenAI 图像请求 -> DashScope 图像合成请求
pub fn image_request_openai_to_ali(request: &ImageRequest, model: &str) -> AliImageRequest {
    AliImageRequest {
        model: model.to_string(),
        input: AliImageInput {
            prompt: request.prompt.clone(),
            negative_prompt: None,
        },
        parameters: AliImageParameters {
            // DashScope 使用 `1024*1024` 形式
            size: request.size.as_ref().map(|s| s.replace('x', "*")),
            n: request.n,
        },
    }
}

/// 厂商错误原样保留，是否隐藏由上游错误策略决定
pub fn ali_error(error: &AliError, status: StatusCode) -> OpenAIErrorWithStatusCode {
    let status = if status.is_success() { StatusCode::INTERNAL_SERVER_ERROR } else { status };
    OpenAIErrorWithStatusCode {
        error: OpenAIError {
            message: error.message.clone(),
            error_type: ERROR_TYPE_UPSTREAM.to_string(),
            param: Value::Null,
            code: Value::String(error.code.clone()),
        },
        status_code: status.as_u16(),
        local_error: false,
    }
}

async fn fetch_task_status(
    ctx: &ClientContext,
    info: &RelayInfo,
    task_id: &str,
) -> Result<AliTaskResponse, OpenAIErrorWithStatusCode> {
    let url = format!("{}/api/v1/tasks/{task_id}", info.base_url);
    let mut request = ctx.http.client().get(&url).bearer_auth(&info.api_key);
    if let Some(timeout) = ctx.http.timeout() {
        request = request.timeout(timeout);
    }
    let resp = request.send().await.map_err(|e| {
        openai_error_wrapper(e, "fetch_task_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    resp.json::<AliTaskResponse>().await.map_err(|e| {
        openai_error_wrapper(e, "unmarshal_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })
}

/// 轮询任务直到成功、失败或达到最大次数
async fn poll_task(
    ctx: &ClientContext,
    info: &RelayInfo,
    task_id: &str,
) -> Result<AliTaskOutput, OpenAIErrorWithStatusCode> {
    let policy = info.image_poll;
    for attempt in 1..=policy.max_attempts {
        let task = fetch_task_status(ctx, info, task_id).await?;
        if task.error.is_error() {
            return Err(ali_error(&task.error, StatusCode::INTERNAL_SERVER_ERROR));
        }
        match task.output.task_status.as_str() {
            TASK_SUCCEEDED => return Ok(task.output),
            TASK_FAILED | TASK_UNKNOWN => {
                let error = AliError {
                    code: task.output.code,
                    message: task.output.message,
                    request_id: task.error.request_id,
                };
                return Err(ali_error(&error, StatusCode::INTERNAL_SERVER_ERROR));
            }
            status => {
                debug!(
                    component = "relay.ali",
                    request_id = %info.request_id,
                    task_id = %task_id,
                    attempt,
                    status,
                    "图像任务未完成"
                );
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }
    Err(openai_error_wrapper(
        "image task did not finish in time",
        "ali_task_timeout",
        StatusCode::GATEWAY_TIMEOUT,
    ))
}

async fn download_base64(ctx: &ClientContext, url: &str) -> Result<String, OpenAIErrorWithStatusCode> {
    let download_failed =
        |e: reqwest::Error| openai_error_wrapper(e, "download_image_failed", StatusCode::INTERNAL_SERVER_ERROR);
    let mut request = ctx.http.client().get(url);
    if let Some(timeout) = ctx.http.timeout() {
        request = request.timeout(timeout);
    }
    let bytes = request
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(download_failed)?
        .bytes()
        .await
        .map_err(download_failed)?;
    Ok(STANDARD.encode(bytes))
}

/// 任务结果 -> OpenAI 图像响应
async fn to_openai_image(
    ctx: &ClientContext,
    info: &RelayInfo,
    output: AliTaskOutput,
) -> Result<ImageResponse, OpenAIErrorWithStatusCode> {
    let as_base64 = info.image_response_format.as_deref() == Some(B64_JSON);
    let mut data = Vec::with_capacity(output.results.len());
    for result in output.results.into_iter().filter(|r| !r.url.is_empty()) {
        if as_base64 {
            data.push(ImageData {
                b64_json: Some(download_base64(ctx, &result.url).await?),
                ..ImageData::default()
            });
        } else {
            data.push(ImageData {
                url: Some(result.url),
                ..ImageData::default()
            });
        }
    }
    Ok(ImageResponse {
        created: Utc::now().timestamp(),
        data,
    })
}

pub async fn ali_image_handler(
    ctx: &ClientContext,
    resp: UpstreamResponse,
    info: &RelayInfo,
    writer: &mut ClientWriter,
) -> Result<Usage, OpenAIErrorWithStatusCode> {
    let status = resp.status;
    let body = resp.bytes().await.map_err(|e| {
        openai_error_wrapper(e, "read_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    let submitted: AliTaskResponse = serde_json::from_slice(&body).map_err(|e| {
        openai_error_wrapper(e, "unmarshal_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    if submitted.error.is_error() {
        return Err(ali_error(&submitted.error, status));
    }
    let task_id = submitted.output.task_id;
    if task_id.is_empty() {
        return Err(openai_error_wrapper(
            "task id is empty",
            "ali_task_id_empty",
            StatusCode::INTERNAL_SERVER_ERROR,
        ));
    }
    info!(component = "relay.ali", request_id = %info.request_id, task_id = %task_id, "图像任务已提交");

    let output = poll_task(ctx, info, &task_id).await?;
    let response = to_openai_image(ctx, info, output).await?;
    writer.write_json(&response).await?;
    Ok(Usage::new(info.prompt_tokens, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_request_size_format() {
        let request = ImageRequest {
            prompt: "a cat".to_string(),
            size: Some("1024x768".to_string()),
            n: Some(2),
            ..ImageRequest::default()
        };
        let ali = image_request_openai_to_ali(&request, "wanx-v1");
        assert_eq!(ali.model, "wanx-v1");
        assert_eq!(ali.parameters.size.as_deref(), Some("1024*768"));
        assert_eq!(ali.parameters.n, Some(2));
        assert_eq!(ali.input.prompt, "a cat");
    }

    #[test]
    fn test_vendor_error_keeps_message() {
        let err = ali_error(
            &AliError {
                code: "InvalidApiKey".to_string(),
                message: "Invalid API-key provided.".to_string(),
                request_id: String::new(),
            },
            StatusCode::UNAUTHORIZED,
        );
        assert_eq!(err.status_code, 401);
        assert_eq!(err.error.message, "Invalid API-key provided.");
        assert_eq!(err.code_str(), "InvalidApiKey");
    }
}
