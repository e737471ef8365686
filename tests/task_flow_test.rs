//! # 异步任务集成测试
//!
//! Suno 提交与查询经真实监听的转发服务到 wiremock 上游。

mod common;

use common::spawn_relay;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn suno_config(base_url: &str) -> String {
    format!(
        r#"
[[channels]]
id = 7
name = "suno"
type = "suno"
base_url = "{base_url}"
key = "sk-suno"
"#
    )
}

#[tokio::test]
async fn test_submit_music_defaults_model_version() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/suno/submit/MUSIC"))
        .and(header("authorization", "Bearer sk-suno"))
        .and(body_partial_json(json!({"prompt": "a song", "mv": "chirp-v3-0"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": "success", "message": "", "data": "task-42"})),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let relay = spawn_relay(&suno_config(&upstream.uri())).await;
    let resp = reqwest::Client::new()
        .post(format!("{relay}/suno/submit/music"))
        .json(&json!({"prompt": "a song"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"], "task-42");
}

#[tokio::test]
async fn test_submit_lyrics_without_prompt_never_reaches_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let relay = spawn_relay(&suno_config(&upstream.uri())).await;
    let resp = reqwest::Client::new()
        .post(format!("{relay}/suno/submit/lyrics"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "invalid_request");
    assert_eq!(body["message"], "prompt_empty");
}

#[tokio::test]
async fn test_submit_unknown_action_rejected() {
    let relay = spawn_relay(&suno_config("http://127.0.0.1:9")).await;
    let resp = reqwest::Client::new()
        .post(format!("{relay}/suno/submit/remix"))
        .json(&json!({"prompt": "x"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "invalid_action");
}

#[tokio::test]
async fn test_submit_upstream_failure_envelope() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/suno/submit/LYRICS"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": "quota_exhausted", "message": "no credits", "data": ""})),
        )
        .mount(&upstream)
        .await;

    let relay = spawn_relay(&suno_config(&upstream.uri())).await;
    let resp = reqwest::Client::new()
        .post(format!("{relay}/suno/submit/lyrics"))
        .json(&json!({"prompt": "rain"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "quota_exhausted");
    assert_eq!(body["message"], "no credits");
}

#[tokio::test]
async fn test_submit_failure_envelope_hidden() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/suno/submit/MUSIC"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": "quota_exhausted", "message": "account 42 has no credits", "data": ""})),
        )
        .mount(&upstream)
        .await;

    let config = format!("[relay]\nhide_upstream_error = true\n{}", suno_config(&upstream.uri()));
    let relay = spawn_relay(&config).await;
    let resp = reqwest::Client::new()
        .post(format!("{relay}/suno/submit/music"))
        .json(&json!({"prompt": "a song"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "quota_exhausted");
    assert_eq!(body["message"], "Upstream error with status code 500");
}

#[tokio::test]
async fn test_fetch_passes_upstream_result_through() {
    let upstream = MockServer::start().await;
    let result = json!({"code": "success", "message": "", "data": [{"task_id": "task-42", "status": "SUCCESS"}]});
    Mock::given(method("POST"))
        .and(path("/suno/fetch"))
        .and(header("authorization", "Bearer sk-suno"))
        .and(body_partial_json(json!({"ids": ["task-42"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(result.clone()))
        .expect(1)
        .mount(&upstream)
        .await;

    let relay = spawn_relay(&suno_config(&upstream.uri())).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{relay}/suno/fetch"))
        .json(&json!({"ids": ["task-42"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, result);

    let resp = client
        .post(format!("{relay}/suno/fetch"))
        .json(&json!({"ids": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_no_suno_channel_configured() {
    let config = r#"
[[channels]]
id = 1
type = "openai"
models = ["gpt-4o"]
"#;
    let relay = spawn_relay(config).await;
    let resp = reqwest::Client::new()
        .post(format!("{relay}/suno/submit/music"))
        .json(&json!({"prompt": "x"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "channel_not_found");
}

#[tokio::test]
async fn test_fetch_gives_up_after_configured_timeout() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/suno/fetch"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": "success", "data": []}))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&upstream)
        .await;

    let config = format!("[relay]\nfetch_task_timeout_secs = 1\n{}", suno_config(&upstream.uri()));
    let relay = spawn_relay(&config).await;
    let started = std::time::Instant::now();
    let resp = reqwest::Client::new()
        .post(format!("{relay}/suno/fetch"))
        .json(&json!({"ids": ["task-42"]}))
        .send()
        .await
        .unwrap();

    assert!(started.elapsed() < std::time::Duration::from_secs(4));
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "fetch_task_failed");
}
