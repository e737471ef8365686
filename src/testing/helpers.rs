//! # 测试辅助函数
//!
//! 日志初始化、SSE 报文构造与临时配置文件

use axum::http::HeaderMap;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Once;
use tempfile::TempDir;
use tracing::Level;

use crate::relay::channel::api_request::RelayClient;
use crate::relay::info::ClientContext;

static INIT: Once = Once::new();

/// 初始化测试环境
pub fn init_test_env() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// 将 JSON 帧编码为 OpenAI 风格的 SSE 报文，末尾附 `[DONE]`
pub fn sse_body(frames: &[Value]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(&frame.to_string());
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// 将 (事件名, JSON) 编码为 Claude 风格的 SSE 报文
pub fn claude_sse_body(events: &[Value]) -> String {
    events
        .iter()
        .map(|event| {
            let name = event.get("type").and_then(Value::as_str).unwrap_or("message");
            format!("event: {name}\ndata: {event}\n\n")
        })
        .collect()
}

/// 空请求头的客户端上下文
pub fn client_context() -> ClientContext {
    ClientContext::new(HeaderMap::new(), RelayClient::default())
}

/// 带指定请求头的客户端上下文
pub fn client_context_with(headers: &[(&'static str, &str)]) -> ClientContext {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.parse() {
            map.insert(*name, value);
        }
    }
    ClientContext::new(map, RelayClient::default())
}

/// 写入临时配置文件，返回目录守卫与文件路径
pub fn temp_config_file(content: &str) -> std::io::Result<(TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    std::fs::write(&path, content)?;
    Ok((dir, path))
}
