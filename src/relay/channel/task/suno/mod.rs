//! # Suno 音乐生成
//!
//! 提交 `POST {base}/suno/submit/{action}`，查询 `POST {base}/suno/fetch`。
//! 提交结果的 `{code, message, data}` 信封原样透传给客户端，`data` 即任务ID。

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::dto::task::{SunoSubmitReq, TaskResponse};
use crate::error::{Context, RelayError};
use crate::relay::adaptor::TaskAdaptor;
use crate::relay::channel::api_request::{RelayClient, UpstreamResponse};
use crate::relay::constant::{SUNO_ACTION_LYRICS, SUNO_ACTION_MUSIC};
use crate::relay::error::{TaskError, task_error_wrapper, task_error_wrapper_local};
use crate::relay::helper::ClientWriter;
use crate::relay::info::{ClientContext, TaskRelayInfo, TaskRequest};

pub const MODEL_LIST: &[&str] = &["suno_music", "suno_lyrics"];

pub const CHANNEL_NAME: &str = "suno";

/// 未指定模型版本时使用
pub const DEFAULT_MV: &str = "chirp-v3-0";

/// 不从上游响应复制的逐跳头
const SKIPPED_HEADERS: [header::HeaderName; 3] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

#[derive(Debug, Default, Clone, Copy)]
pub struct SunoAdaptor;

fn invalid_request(message: &str) -> TaskError {
    task_error_wrapper_local(message, "invalid_request", StatusCode::BAD_REQUEST)
}

/// 按动作补全或拒绝请求
fn action_validate(request: &mut SunoSubmitReq, action: &str) -> Result<(), TaskError> {
    match action {
        SUNO_ACTION_MUSIC => {
            if request.mv.is_empty() {
                request.mv = DEFAULT_MV.to_string();
            }
            Ok(())
        }
        SUNO_ACTION_LYRICS if request.prompt.is_empty() => Err(invalid_request("prompt_empty")),
        SUNO_ACTION_LYRICS => Ok(()),
        _ => Err(invalid_request("invalid_action")),
    }
}

#[async_trait]
impl TaskAdaptor for SunoAdaptor {
    fn validate_request_and_set_action(
        &self,
        action: &str,
        body: &[u8],
        info: &mut TaskRelayInfo,
    ) -> Result<(), TaskError> {
        let action = action.to_uppercase();
        let mut request: SunoSubmitReq = serde_json::from_slice(body).map_err(|e| {
            task_error_wrapper_local(e, "invalid_request", StatusCode::BAD_REQUEST)
        })?;
        action_validate(&mut request, &action)?;

        if !request.continue_clip_id.is_empty() {
            if request.task_id.is_empty() {
                return Err(invalid_request("task id is empty"));
            }
            info.origin_task_id.clone_from(&request.task_id);
        }

        info.action = action;
        info.task_request = Some(TaskRequest::Suno(request));
        Ok(())
    }

    fn build_request_url(&self, info: &TaskRelayInfo) -> Result<String, TaskError> {
        Ok(format!("{}/suno/submit/{}", info.base_url, info.action))
    }

    fn build_request_header(&self, ctx: &ClientContext, headers: &mut HeaderMap, info: &TaskRelayInfo) {
        for name in [header::CONTENT_TYPE, header::ACCEPT] {
            if let Some(value) = ctx.headers.get(&name) {
                headers.insert(name, value.clone());
            }
        }
        if let Ok(auth) = HeaderValue::from_str(&format!("Bearer {}", info.api_key)) {
            headers.insert(header::AUTHORIZATION, auth);
        }
    }

    fn build_request_body(&self, info: &TaskRelayInfo) -> Result<Bytes, TaskError> {
        let Some(TaskRequest::Suno(request)) = &info.task_request else {
            return Err(task_error_wrapper_local(
                "task request not validated",
                "invalid_request",
                StatusCode::INTERNAL_SERVER_ERROR,
            ));
        };
        serde_json::to_vec(request).map(Bytes::from).map_err(|e| {
            task_error_wrapper_local(e, "marshal_request_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
        })
    }

    async fn do_response(
        &self,
        resp: UpstreamResponse,
        info: &TaskRelayInfo,
        writer: &mut ClientWriter,
    ) -> Result<String, TaskError> {
        let status = resp.status;
        let upstream_headers = resp.headers.clone();
        let body = resp.bytes().await.map_err(|e| {
            task_error_wrapper(e, "read_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
        })?;
        let envelope: TaskResponse<String> = serde_json::from_slice(&body).map_err(|e| {
            task_error_wrapper(e, "unmarshal_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
        })?;
        if !envelope.is_success() {
            warn!(
                component = "relay.task",
                request_id = %info.request_id,
                code = %envelope.code,
                "Suno 提交失败"
            );
            return Err(task_error_wrapper(
                envelope.message,
                &envelope.code,
                StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }

        for (name, value) in &upstream_headers {
            if !SKIPPED_HEADERS.contains(name) {
                writer.set_header(name.clone(), value.clone());
            }
        }
        writer.set_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        writer.set_status(status);
        writer.write_bytes(body).await.map_err(|e| e.to_task())?;

        debug!(
            component = "relay.task",
            request_id = %info.request_id,
            task_id = %envelope.data,
            action = %info.action,
            "Suno 任务已提交"
        );
        Ok(envelope.data)
    }

    async fn fetch_task(
        &self,
        http: &RelayClient,
        base_url: &str,
        key: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<UpstreamResponse, RelayError> {
        let url = format!("{base_url}/suno/fetch");
        let resp = http
            .client()
            .post(&url)
            .bearer_auth(key)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("查询 Suno 任务失败: {url}"))?;
        Ok(UpstreamResponse::from_reqwest(resp))
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
    use crate::relay::constant::ChannelType;
    use crate::testing::{ChannelFixture, client_context_with};
    use serde_json::json;

    fn info() -> TaskRelayInfo {
        ChannelFixture::new(ChannelType::Suno)
            .base_url("https://suno.example")
            .task_info()
            .unwrap()
    }

    fn validate(action: &str, body: Value) -> (Result<(), TaskError>, TaskRelayInfo) {
        let mut info = info();
        let result =
            SunoAdaptor.validate_request_and_set_action(action, body.to_string().as_bytes(), &mut info);
        (result, info)
    }

    #[test]
    fn test_music_defaults_mv() {
        let (result, info) = validate("music", json!({"prompt": "rain"}));
        result.unwrap();
        assert_eq!(info.action, "MUSIC");
        let Some(TaskRequest::Suno(request)) = &info.task_request else {
            panic!("task request missing");
        };
        assert_eq!(request.mv, DEFAULT_MV);
        assert_eq!(
            SunoAdaptor.build_request_url(&info).unwrap(),
            "https://suno.example/suno/submit/MUSIC"
        );
    }

    #[test]
    fn test_lyrics_empty_prompt_is_local_error() {
        let (result, info) = validate("lyrics", json!({}));
        let err = result.unwrap_err();
        assert_eq!(err.message, "prompt_empty");
        assert_eq!(err.status_code, 400);
        assert!(err.local_error);
        assert!(info.task_request.is_none());
    }

    #[test]
    fn test_unknown_action() {
        let (result, _) = validate("video", json!({"prompt": "x"}));
        assert_eq!(result.unwrap_err().message, "invalid_action");
    }

    #[test]
    fn test_continue_requires_task_id() {
        let (result, _) = validate("music", json!({"continue_clip_id": "clip"}));
        assert_eq!(result.unwrap_err().message, "task id is empty");

        let (result, info) = validate("music", json!({"continue_clip_id": "clip", "task_id": "t1"}));
        result.unwrap();
        assert_eq!(info.origin_task_id, "t1");
    }

    #[test]
    fn test_body_requires_validation() {
        let err = SunoAdaptor.build_request_body(&info()).unwrap_err();
        assert_eq!(err.status_code, 500);

        let (_, info) = validate("music", json!({"prompt": "rain", "mv": "chirp-v4"}));
        let body: Value = serde_json::from_slice(&SunoAdaptor.build_request_body(&info).unwrap()).unwrap();
        assert_eq!(body, json!({"prompt": "rain", "mv": "chirp-v4"}));
    }

    #[test]
    fn test_headers() {
        let ctx = client_context_with(&[("content-type", "application/json"), ("accept", "*/*")]);
        let mut headers = HeaderMap::new();
        SunoAdaptor.build_request_header(&ctx, &mut headers, &info());
        assert_eq!(headers[header::AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers[header::ACCEPT], "*/*");
    }

    #[tokio::test]
    async fn test_do_response_success_passes_body() {
        let body = json!({"code": "success", "message": "", "data": "task-9"}).to_string();
        let resp = UpstreamResponse::from_bytes(StatusCode::OK, body.clone())
            .with_header(header::HeaderName::from_static("x-upstream"), HeaderValue::from_static("1"));
        let mut writer = ClientWriter::buffered();
        let task_id = SunoAdaptor.do_response(resp, &info(), &mut writer).await.unwrap();
        assert_eq!(task_id, "task-9");
        assert_eq!(writer.buffered_body(), body.as_bytes());
        assert_eq!(writer.headers()["x-upstream"], "1");
    }

    #[tokio::test]
    async fn test_do_response_vendor_failure() {
        let body = json!({"code": "quota", "message": "no credits", "data": ""}).to_string();
        let mut writer = ClientWriter::buffered();
        let err = SunoAdaptor
            .do_response(UpstreamResponse::from_bytes(StatusCode::OK, body), &info(), &mut writer)
            .await
            .unwrap_err();
        assert_eq!(err.code, "quota");
        assert_eq!(err.message, "no credits");
        assert_eq!(err.status_code, 500);
        assert!(!err.local_error);
        assert!(writer.buffered_body().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_task_deadline_fires() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/suno/fetch"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"code": "success", "data": []}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&upstream)
            .await;

        let http = RelayClient::new(60);
        let started = std::time::Instant::now();
        let result = SunoAdaptor
            .fetch_task(
                &http,
                &upstream.uri(),
                "sk-test",
                &json!({"ids": ["task-1"]}),
                Duration::from_millis(200),
            )
            .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
