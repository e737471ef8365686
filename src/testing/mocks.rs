//! # 测试 Mock 对象
//!
//! 上游 HTTP 服务（wiremock）与邮件发送器的 Mock

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub use crate::notification::email::MockMailer;

/// 挂载返回 JSON 的 POST 路由
pub async fn mount_json(server: &MockServer, route: &str, status: u16, body: Value) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

/// 挂载返回 `text/event-stream` 的 POST 路由
pub async fn mount_sse(server: &MockServer, route: &str, body: String) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}
