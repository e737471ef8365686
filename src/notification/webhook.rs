//! # Webhook 投递
//!
//! 负载序列化一次，签名与发送使用同一份字节。配置了 worker 时经 worker 中转，
//! 否则用短超时客户端直连。

use axum::http::header;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{Notify, substitute_placeholders};
use crate::config::WorkerConfig;
use crate::error::{RelayError, Result};

/// 签名头
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

/// Webhook 请求体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub notify_type: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
    pub timestamp: i64,
}

impl WebhookPayload {
    /// 替换占位符后构造负载
    pub fn from_notify(notify: &Notify, timestamp: i64) -> Self {
        Self {
            notify_type: notify.notify_type.clone(),
            title: notify.title.clone(),
            content: substitute_placeholders(&notify.content, &notify.values),
            values: notify.values.clone(),
            timestamp,
        }
    }
}

/// worker 中转请求体，`body` 为 base64 编码的原始负载
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerRequest {
    pub url: String,
    pub key: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// 负载字节的十六进制 HMAC-SHA256
pub fn generate_signature(secret: &str, payload: &[u8]) -> String {
    // HMAC 接受任意长度的密钥
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Webhook 发送器
#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    worker: WorkerConfig,
}

impl WebhookSender {
    pub fn new(timeout: Duration, worker: WorkerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, worker }
    }

    /// 投递一条通知；非 2xx 视为失败
    pub async fn send(&self, url: &str, secret: Option<&str>, notify: &Notify) -> Result<()> {
        let payload = WebhookPayload::from_notify(notify, chrono::Utc::now().timestamp());
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| RelayError::notify_with_source("序列化 webhook 负载失败", e))?;
        let secret = secret.filter(|s| !s.is_empty());

        let status = if self.worker.enabled() {
            self.send_via_worker(url, secret, bytes).await?
        } else {
            self.send_direct(url, secret, bytes).await?
        };

        debug!(component = "relay.notify", url, status = status.as_u16(), "webhook 已投递");
        if !status.is_success() {
            return Err(RelayError::notify(format!(
                "webhook request failed with status code: {}",
                status.as_u16()
            )));
        }
        Ok(())
    }

    async fn send_direct(
        &self,
        url: &str,
        secret: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<reqwest::StatusCode> {
        let mut request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(secret) = secret {
            request = request.header(SIGNATURE_HEADER, generate_signature(secret, &bytes));
        }
        let resp = request
            .body(bytes)
            .send()
            .await
            .map_err(|e| RelayError::notify_with_source("发送 webhook 请求失败", e))?;
        Ok(resp.status())
    }

    async fn send_via_worker(
        &self,
        url: &str,
        secret: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<reqwest::StatusCode> {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(secret) = secret {
            headers.insert("X-Webhook-Signature".to_string(), generate_signature(secret, &bytes));
            headers.insert("Authorization".to_string(), format!("Bearer {secret}"));
        }
        let worker_request = WorkerRequest {
            url: url.to_string(),
            key: self.worker.valid_key.clone(),
            method: "POST".to_string(),
            headers,
            body: STANDARD.encode(&bytes),
        };
        let resp = self
            .client
            .post(&self.worker.url)
            .json(&worker_request)
            .send()
            .await
            .map_err(|e| RelayError::notify_with_source("经 worker 发送 webhook 失败", e))?;
        Ok(resp.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notify() -> Notify {
        Notify::new("quota_exceed", "额度提醒", "剩余额度 {{value}}", vec![json!(42)])
    }

    #[test]
    fn test_signature_is_hmac_of_exact_bytes() {
        let payload = br#"{"type":"t","title":"x","content":"c","timestamp":1}"#;
        let sig = generate_signature("s", payload);
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, generate_signature("s", payload));
        assert_ne!(sig, generate_signature("other", payload));
        assert_ne!(sig, generate_signature("s", b"{}"));
    }

    #[test]
    fn test_known_signature_vector() {
        // RFC 4231 测试用例 2
        assert_eq!(
            generate_signature("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_payload_substitutes_content() {
        let payload = WebhookPayload::from_notify(&notify(), 100);
        assert_eq!(payload.content, "剩余额度 42");
        assert_eq!(payload.values, vec![json!(42)]);
        assert_eq!(payload.timestamp, 100);
    }

    #[tokio::test]
    async fn test_direct_signed_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists(SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WebhookSender::new(Duration::from_secs(5), WorkerConfig::default());
        sender
            .send(&format!("{}/hook", server.uri()), Some("s"), &notify())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let signature = request.headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        assert_eq!(signature, generate_signature("s", &request.body));
    }

    #[tokio::test]
    async fn test_unsigned_without_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(Duration::from_secs(5), WorkerConfig::default());
        sender.send(&server.uri(), None, &notify()).await.unwrap();
        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get(SIGNATURE_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(Duration::from_secs(5), WorkerConfig::default());
        let err = sender.send(&server.uri(), Some("s"), &notify()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_worker_envelope() {
        let worker = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/relay"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&worker)
            .await;

        let sender = WebhookSender::new(
            Duration::from_secs(5),
            WorkerConfig {
                url: format!("{}/relay", worker.uri()),
                valid_key: "wk".to_string(),
            },
        );
        sender
            .send("https://hooks.example/notify", Some("s"), &notify())
            .await
            .unwrap();

        let requests = worker.received_requests().await.unwrap();
        let envelope: WorkerRequest = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(envelope.url, "https://hooks.example/notify");
        assert_eq!(envelope.key, "wk");
        assert_eq!(envelope.method, "POST");
        assert_eq!(envelope.headers["Authorization"], "Bearer s");
        let body = STANDARD.decode(&envelope.body).unwrap();
        assert_eq!(envelope.headers["X-Webhook-Signature"], generate_signature("s", &body));
        let payload: WebhookPayload = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.content, "剩余额度 42");
    }
}
