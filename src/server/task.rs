//! # 异步任务路由
//!
//! `POST /suno/submit/{action}` 提交任务，`POST /suno/fetch` 查询任务状态。

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use tracing::{error, info, warn};

use super::relay::CHANNEL_ID_HEADER;
use super::state::AppState;
use crate::config::{AppConfig, ChannelConfig};
use crate::dto::task::SunoFetchReq;
use crate::relay::constant::ChannelType;
use crate::relay::error::{
    TaskError, hide_upstream_task_message, relay_error_handler, remap_status_code, task_error_wrapper,
    task_error_wrapper_local,
};
use crate::relay::helper::ClientWriter;
use crate::relay::info::{ClientContext, TaskRelayInfo};
use crate::relay::registry::get_task_adaptor;

fn no_channel() -> TaskError {
    task_error_wrapper_local(
        "no available suno channel",
        "channel_not_found",
        StatusCode::SERVICE_UNAVAILABLE,
    )
}

/// 选择任务渠道：`X-Channel-Id` 优先，否则第一个启用的 Suno 渠道
fn task_channel<'a>(config: &'a AppConfig, headers: &HeaderMap) -> Result<&'a ChannelConfig, TaskError> {
    match headers.get(CHANNEL_ID_HEADER) {
        Some(value) => {
            let id = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .ok_or_else(|| {
                    task_error_wrapper_local("invalid channel id", "invalid_request", StatusCode::BAD_REQUEST)
                })?;
            config
                .channels
                .iter()
                .find(|c| c.id == id && c.enabled && c.channel_type.task_platform().is_some())
                .ok_or_else(no_channel)
        }
        None => config.channel_of_type(ChannelType::Suno).ok_or_else(no_channel),
    }
}

fn log_task_error(stage: &str, err: &TaskError) {
    warn!(
        component = "relay.task",
        stage,
        status = err.status_code,
        code = %err.code,
        local = err.local_error,
        message = %err.message,
        "任务转发失败"
    );
}

/// 提交任务
pub async fn submit(
    State(state): State<AppState>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match submit_inner(&state, &action, headers, &body).await {
        Ok(response) => response,
        Err(err) => {
            log_task_error("submit", &err);
            err.into_response()
        }
    }
}

async fn submit_inner(
    state: &AppState,
    action: &str,
    headers: HeaderMap,
    body: &[u8],
) -> Result<Response, TaskError> {
    let config = state.config();
    let channel = task_channel(&config, &headers)?;
    let platform = channel.channel_type.task_platform().ok_or_else(no_channel)?;
    let mut adaptor = get_task_adaptor(platform).ok_or_else(no_channel)?;

    let mut info = TaskRelayInfo::new(channel, platform);
    adaptor.init(&info);
    adaptor.validate_request_and_set_action(action, body, &mut info)?;
    let payload = adaptor.build_request_body(&info)?;

    let ctx = ClientContext::new(headers, state.http().clone());
    let hide = config.relay.hide_upstream_error;
    let hidden = move |mut err: TaskError| {
        hide_upstream_task_message(&mut err, hide);
        err
    };
    let resp = adaptor.do_request(&ctx, &info, payload).await.map_err(hidden)?;
    if !resp.is_success() {
        let err = relay_error_handler(
            resp,
            config.relay.show_body_when_fail,
            hide,
        )
        .await;
        let mut task_err = err.to_task();
        task_err.status_code = remap_status_code(task_err.status_code, channel.status_code_mapping.as_deref());
        return Err(task_err);
    }

    let mut writer = ClientWriter::buffered();
    let task_id = adaptor
        .do_response(resp, &info, &mut writer)
        .await
        .map_err(hidden)?;
    info!(
        component = "relay.task",
        request_id = %info.request_id,
        channel_id = info.channel_id,
        action = %info.action,
        origin_task_id = %info.origin_task_id,
        task_id = %task_id,
        "任务已提交"
    );
    Ok(writer.into_response())
}

/// 查询任务
pub async fn fetch(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match fetch_inner(&state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => {
            log_task_error("fetch", &err);
            err.into_response()
        }
    }
}

async fn fetch_inner(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Response, TaskError> {
    let config = state.config();
    let request: SunoFetchReq = serde_json::from_slice(body)
        .map_err(|e| task_error_wrapper_local(e, "invalid_request", StatusCode::BAD_REQUEST))?;
    if request.ids.is_empty() {
        return Err(task_error_wrapper_local("ids is empty", "invalid_request", StatusCode::BAD_REQUEST));
    }
    let channel = task_channel(&config, headers)?;
    let platform = channel.channel_type.task_platform().ok_or_else(no_channel)?;
    let adaptor = get_task_adaptor(platform).ok_or_else(no_channel)?;

    let body = serde_json::to_value(&request)
        .map_err(|e| task_error_wrapper_local(e, "invalid_request", StatusCode::BAD_REQUEST))?;
    let timeout = Duration::from_secs(config.relay.fetch_task_timeout_secs);
    let resp = adaptor
        .fetch_task(state.http(), &channel.effective_base_url(), &channel.key, &body, timeout)
        .await
        .map_err(|e| {
            error!(component = "relay.task", channel_id = channel.id, error = %e, "查询任务失败");
            task_error_wrapper(e, "fetch_task_failed", StatusCode::INTERNAL_SERVER_ERROR)
        })?;

    let status = resp.status;
    let body = resp.bytes().await.map_err(|e| {
        task_error_wrapper(e, "read_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}
