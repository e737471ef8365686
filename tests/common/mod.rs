//! 集成测试公共工具：以 TOML 配置启动一个真实监听的转发服务

#![allow(dead_code)]

use api_relay::AppConfig;
use api_relay::config::ConfigManager;
use api_relay::notification::UnconfiguredMailer;
use api_relay::server::{AppState, build_router};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;

/// 解析 TOML 配置并在随机端口启动服务，返回根地址
pub async fn spawn_relay(config_toml: &str) -> String {
    let config: AppConfig = toml::from_str(config_toml).expect("valid test config");
    let manager = ConfigManager::from_config(config).expect("config manager");
    let state = AppState::new(Arc::new(manager), Arc::new(UnconfiguredMailer));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, build_router(state, false))
            .await
            .expect("serve");
    });
    format!("http://{addr}")
}

/// 单渠道配置
pub fn single_channel(channel_type: &str, base_url: &str, models: &[&str]) -> String {
    let models = models
        .iter()
        .map(|m| format!("\"{m}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"
[[channels]]
id = 1
name = "{channel_type}-test"
type = "{channel_type}"
base_url = "{base_url}"
key = "sk-upstream"
models = [{models}]
"#
    )
}

/// 以 SSE 文本构造 OpenAI 流式上游响应体
pub fn openai_sse(frames: &[Value]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(&frame.to_string());
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// 以 SSE 文本构造 Claude 流式上游响应体
pub fn claude_sse(events: &[Value]) -> String {
    let mut body = String::new();
    for event in events {
        let name = event["type"].as_str().unwrap_or_default();
        body.push_str(&format!("event: {name}\ndata: {event}\n\n"));
    }
    body
}

/// 提取响应体中所有 `data:` 行
pub fn data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

/// 提取响应体中所有 `event:` 名称
pub fn event_names(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .map(str::to_string)
        .collect()
}
