//! # 错误规范化
//!
//! 将传输失败、上游错误体与本地校验失败统一成客户端协议的错误信封：
//! OpenAI `{"error": {...}}`、Claude `{"type":"error","error":{...}}` 与任务 `{code, message}`。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt::Display;
use tracing::error;

use super::channel::api_request::UpstreamResponse;
use crate::dto::claude::ClaudeError;

/// 本系统生成的错误类型名
pub const ERROR_TYPE_RELAY: &str = "relay_error";
/// 上游错误类型名
pub const ERROR_TYPE_UPSTREAM: &str = "upstream_error";
/// 传输层错误统一替换后的文案
pub const UPSTREAM_FAILED_MESSAGE: &str = "upstream request failed";

/// 出现即视为传输层错误的关键词
const TRANSPORT_TERMS: [&str; 3] = ["post", "dial", "http"];

/// OpenAI 错误体
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OpenAIError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub param: Value,
    #[serde(default)]
    pub code: Value,
}

/// 带状态码的 OpenAI 错误信封
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAIErrorWithStatusCode {
    pub error: OpenAIError,
    pub status_code: u16,
    /// 本地错误（客户端输入或内部失败），不会被上游隐藏策略改写
    pub local_error: bool,
}

impl OpenAIErrorWithStatusCode {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// 错误码文本
    pub fn code_str(&self) -> String {
        match &self.error.code {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// 转为 Claude 格式信封
    pub fn to_claude(&self) -> ClaudeErrorWithStatusCode {
        ClaudeErrorWithStatusCode {
            error: ClaudeError {
                error_type: self.error.error_type.clone(),
                message: self.error.message.clone(),
            },
            status_code: self.status_code,
            local_error: self.local_error,
        }
    }

    /// 转为任务格式信封
    pub fn to_task(&self) -> TaskError {
        TaskError {
            code: self.code_str(),
            message: self.error.message.clone(),
            status_code: self.status_code,
            local_error: self.local_error,
        }
    }
}

impl Display for OpenAIErrorWithStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.status_code, self.error.message)
    }
}

impl std::error::Error for OpenAIErrorWithStatusCode {}

impl IntoResponse for OpenAIErrorWithStatusCode {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.error }))).into_response()
    }
}

/// 带状态码的 Claude 错误信封
#[derive(Debug, Clone, PartialEq)]
pub struct ClaudeErrorWithStatusCode {
    pub error: ClaudeError,
    pub status_code: u16,
    pub local_error: bool,
}

impl Display for ClaudeErrorWithStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.status_code, self.error.message)
    }
}

impl std::error::Error for ClaudeErrorWithStatusCode {}

impl IntoResponse for ClaudeErrorWithStatusCode {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "type": "error", "error": self.error }))).into_response()
    }
}

/// 任务接口错误信封
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{status_code}] {code}: {message}")]
pub struct TaskError {
    pub code: String,
    pub message: String,
    pub status_code: u16,
    pub local_error: bool,
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(json!({ "code": self.code, "message": self.message, "data": Value::Null })),
        )
            .into_response()
    }
}

/// 传输层文本替换为通用文案，原文只写入服务端日志
fn sanitize(err: &dyn Display) -> String {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if TRANSPORT_TERMS.iter().any(|term| lower.contains(term)) {
        error!(component = "relay.error", raw = %text, "upstream transport error");
        return UPSTREAM_FAILED_MESSAGE.to_string();
    }
    text
}

fn openai_envelope(message: String, code: &str, status: StatusCode, local_error: bool) -> OpenAIErrorWithStatusCode {
    OpenAIErrorWithStatusCode {
        error: OpenAIError {
            message,
            error_type: ERROR_TYPE_RELAY.to_string(),
            param: Value::Null,
            code: Value::String(code.to_string()),
        },
        status_code: status.as_u16(),
        local_error,
    }
}

/// 构造 OpenAI 错误信封，传输层文本会被替换
pub fn openai_error_wrapper(
    err: impl Display,
    code: &str,
    status: StatusCode,
) -> OpenAIErrorWithStatusCode {
    openai_envelope(sanitize(&err), code, status, false)
}

/// 构造本地 OpenAI 错误信封，文案原样保留
pub fn openai_error_wrapper_local(
    err: impl Display,
    code: &str,
    status: StatusCode,
) -> OpenAIErrorWithStatusCode {
    openai_envelope(err.to_string(), code, status, true)
}

fn claude_envelope(message: String, status: StatusCode, local_error: bool) -> ClaudeErrorWithStatusCode {
    ClaudeErrorWithStatusCode {
        error: ClaudeError {
            error_type: ERROR_TYPE_RELAY.to_string(),
            message,
        },
        status_code: status.as_u16(),
        local_error,
    }
}

/// 构造 Claude 错误信封
pub fn claude_error_wrapper(
    err: impl Display,
    _code: &str,
    status: StatusCode,
) -> ClaudeErrorWithStatusCode {
    claude_envelope(sanitize(&err), status, false)
}

/// 构造本地 Claude 错误信封
pub fn claude_error_wrapper_local(
    err: impl Display,
    _code: &str,
    status: StatusCode,
) -> ClaudeErrorWithStatusCode {
    claude_envelope(err.to_string(), status, true)
}

/// 构造任务错误信封
pub fn task_error_wrapper(err: impl Display, code: &str, status: StatusCode) -> TaskError {
    TaskError {
        code: code.to_string(),
        message: sanitize(&err),
        status_code: status.as_u16(),
        local_error: false,
    }
}

/// 构造本地任务错误信封
pub fn task_error_wrapper_local(err: impl Display, code: &str, status: StatusCode) -> TaskError {
    TaskError {
        code: code.to_string(),
        message: err.to_string(),
        status_code: status.as_u16(),
        local_error: true,
    }
}

/// 适配器不支持该操作
pub fn not_implemented(what: &str) -> OpenAIErrorWithStatusCode {
    openai_error_wrapper_local(
        format!("{what} not implemented"),
        "not_implemented",
        StatusCode::NOT_IMPLEMENTED,
    )
}

/// 从非成功的上游响应构造错误信封
pub async fn relay_error_handler(
    resp: UpstreamResponse,
    show_body_when_fail: bool,
    hide_upstream: bool,
) -> OpenAIErrorWithStatusCode {
    let status = resp.status.as_u16();
    match resp.bytes().await {
        Ok(body) => relay_error_from_body(status, &body, show_body_when_fail, hide_upstream),
        Err(e) => {
            error!(component = "relay.error", error = %e, status, "读取上游错误响应失败");
            let mut err = upstream_envelope(status);
            err.error.message = format!("bad response status code {status}");
            apply_hide(&mut err, hide_upstream);
            err
        }
    }
}

/// 按上游状态码与错误体构造信封
pub fn relay_error_from_body(
    status: u16,
    body: &[u8],
    show_body_when_fail: bool,
    hide_upstream: bool,
) -> OpenAIErrorWithStatusCode {
    let mut err = upstream_envelope(status);

    match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let openai_error = value
                .get("error")
                .filter(|e| e.is_object())
                .and_then(|e| serde_json::from_value::<OpenAIError>(e.clone()).ok())
                .filter(|e| !e.message.is_empty());
            match openai_error {
                Some(upstream) => err.error = upstream,
                None => err.error.message = general_error_message(&value),
            }
            if err.error.message.is_empty() {
                err.error.message = format!("bad response status code {status}");
            }
        }
        Err(_) => {
            err.error.message = if show_body_when_fail {
                String::from_utf8_lossy(body).into_owned()
            } else {
                format!("bad response status code {status}")
            };
        }
    }

    apply_hide(&mut err, hide_upstream);
    err
}

fn upstream_envelope(status: u16) -> OpenAIErrorWithStatusCode {
    OpenAIErrorWithStatusCode {
        error: OpenAIError {
            message: String::new(),
            error_type: ERROR_TYPE_UPSTREAM.to_string(),
            param: Value::String(status.to_string()),
            code: Value::String("bad_response_status_code".to_string()),
        },
        status_code: status,
        local_error: false,
    }
}

fn apply_hide(err: &mut OpenAIErrorWithStatusCode, hide_upstream: bool) {
    if let Some(message) = hidden_message(err.status_code, hide_upstream) {
        err.error.message = message;
    }
}

/// 隐藏策略：开启时除 429 外的上游错误只保留状态码
fn hidden_message(status: u16, hide_upstream: bool) -> Option<String> {
    (hide_upstream && status != StatusCode::TOO_MANY_REQUESTS.as_u16())
        .then(|| format!("Upstream error with status code {status}"))
}

/// 对非本地错误应用隐藏策略，需在状态码重映射之前调用
pub fn hide_upstream_message(err: &mut OpenAIErrorWithStatusCode, hide_upstream: bool) {
    if !err.local_error {
        apply_hide(err, hide_upstream);
    }
}

/// 任务错误的隐藏策略
pub fn hide_upstream_task_message(err: &mut TaskError, hide_upstream: bool) {
    if err.local_error {
        return;
    }
    if let Some(message) = hidden_message(err.status_code, hide_upstream) {
        err.message = message;
    }
}

/// 从各厂商的非 OpenAI 错误体中提取文案
fn general_error_message(value: &Value) -> String {
    let candidates = [
        value.pointer("/error/message"),
        value.get("error").filter(|e| e.is_string()),
        value.get("message"),
        value.get("msg"),
        value.get("err"),
        value.get("error_msg"),
        value.pointer("/header/message"),
        value.pointer("/response/error/message"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// 按渠道配置重映射对外状态码
///
/// 配置为空、`{}`、无法解析，或状态码为 200 时保持不变。
pub fn reset_status_code(err: &mut OpenAIErrorWithStatusCode, mapping: Option<&str>) {
    err.status_code = remap_status_code(err.status_code, mapping);
}

/// 状态码重映射
pub fn remap_status_code(status: u16, mapping: Option<&str>) -> u16 {
    let Some(mapping) = mapping.map(str::trim) else {
        return status;
    };
    if mapping.is_empty() || mapping == "{}" || status == StatusCode::OK.as_u16() {
        return status;
    }
    let Ok(table) = serde_json::from_str::<HashMap<String, String>>(mapping) else {
        return status;
    };
    table
        .get(&status.to_string())
        .and_then(|target| target.parse::<u16>().ok())
        .filter(|code| StatusCode::from_u16(*code).is_ok())
        .unwrap_or(status)
}
