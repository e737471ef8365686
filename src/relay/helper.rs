//! # 客户端写出
//!
//! `ClientWriter` 是适配器写客户端响应的唯一出口：非流式请求缓冲到内存，
//! 流式请求逐帧推入有界通道，由 axum 的响应体消费。

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use super::error::{OpenAIErrorWithStatusCode, openai_error_wrapper_local};
use crate::dto::claude::ClaudeStreamEvent;

/// 客户端已断开时使用的状态码
const CLIENT_CLOSED_REQUEST: u16 = 499;

enum Sink {
    Buffered(BytesMut),
    Streaming(mpsc::Sender<Bytes>),
}

/// 客户端响应写出器
pub struct ClientWriter {
    status: StatusCode,
    headers: HeaderMap,
    sink: Sink,
}

impl ClientWriter {
    /// 缓冲模式：适配器返回后一次性生成响应
    pub fn buffered() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            sink: Sink::Buffered(BytesMut::new()),
        }
    }

    /// 流式模式：响应头已由调用方提交，之后只写响应体
    pub fn streaming(sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: event_stream_headers(),
            sink: Sink::Streaming(sender),
        }
    }

    pub const fn is_streaming(&self) -> bool {
        matches!(self.sink, Sink::Streaming(_))
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 写出一段响应体
    pub async fn write_bytes(&mut self, data: Bytes) -> Result<(), OpenAIErrorWithStatusCode> {
        match &mut self.sink {
            Sink::Buffered(buf) => {
                buf.extend_from_slice(&data);
                Ok(())
            }
            Sink::Streaming(tx) => tx.send(data).await.map_err(|_| client_gone()),
        }
    }

    /// 写出 JSON 响应体并设置 Content-Type
    pub async fn write_json<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> Result<(), OpenAIErrorWithStatusCode> {
        let body = serde_json::to_vec(value).map_err(|e| {
            openai_error_wrapper_local(e, "marshal_response_body_failed", StatusCode::INTERNAL_SERVER_ERROR)
        })?;
        self.set_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.write_bytes(Bytes::from(body)).await
    }

    /// 客户端断开时完成，缓冲模式下永不完成
    pub async fn closed(&self) {
        match &self.sink {
            Sink::Streaming(tx) => tx.closed().await,
            Sink::Buffered(_) => std::future::pending().await,
        }
    }

    /// 已缓冲的响应体
    pub fn buffered_body(&self) -> &[u8] {
        match &self.sink {
            Sink::Buffered(buf) => &buf[..],
            Sink::Streaming(_) => &[],
        }
    }
}

impl IntoResponse for ClientWriter {
    fn into_response(self) -> Response {
        let body = match self.sink {
            Sink::Buffered(buf) => Body::from(buf.freeze()),
            Sink::Streaming(_) => Body::empty(),
        };
        let mut response = (self.status, body).into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}

fn client_gone() -> OpenAIErrorWithStatusCode {
    openai_error_wrapper_local(
        "client disconnected",
        "client_gone",
        StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST),
    )
}

/// 读取下一个上游事件；客户端先断开时返回 499，调用方随即释放上游连接
pub async fn next_upstream<S>(
    stream: &mut S,
    writer: &ClientWriter,
) -> Result<Option<S::Item>, OpenAIErrorWithStatusCode>
where
    S: Stream + Unpin,
{
    tokio::select! {
        biased;
        () = writer.closed() => Err(client_gone()),
        item = stream.next() => Ok(item),
    }
}

/// SSE 响应头
pub fn event_stream_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers
}

/// `data: <原文>\n\n`
pub async fn string_data(writer: &mut ClientWriter, data: &str) -> Result<(), OpenAIErrorWithStatusCode> {
    writer.write_bytes(Bytes::from(format!("data: {data}\n\n"))).await
}

/// `data: <json>\n\n`
pub async fn object_data<T: Serialize>(
    writer: &mut ClientWriter,
    value: &T,
) -> Result<(), OpenAIErrorWithStatusCode> {
    let json = serde_json::to_string(value).map_err(|e| {
        openai_error_wrapper_local(e, "marshal_stream_frame_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    string_data(writer, &json).await
}

/// `event: <name>\ndata: <原文>\n\n`
pub async fn event_data(
    writer: &mut ClientWriter,
    event: &str,
    data: &str,
) -> Result<(), OpenAIErrorWithStatusCode> {
    writer
        .write_bytes(Bytes::from(format!("event: {event}\ndata: {data}\n\n")))
        .await
}

/// Claude 命名事件
pub async fn claude_data(
    writer: &mut ClientWriter,
    event: &ClaudeStreamEvent,
) -> Result<(), OpenAIErrorWithStatusCode> {
    let json = serde_json::to_string(event).map_err(|e| {
        openai_error_wrapper_local(e, "marshal_stream_frame_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    event_data(writer, event.event_name(), &json).await
}

/// OpenAI 流结束标记
pub async fn done(writer: &mut ClientWriter) -> Result<(), OpenAIErrorWithStatusCode> {
    string_data(writer, "[DONE]").await
}

/// 收集流式写出器产生的全部帧（测试与基准使用）
pub async fn drain(mut rx: mpsc::Receiver<Bytes>) -> String {
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        out.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::claude::ClaudeStreamEvent;

    #[tokio::test]
    async fn test_buffered_writer_into_response() {
        let mut writer = ClientWriter::buffered();
        writer.set_status(StatusCode::CREATED);
        writer.write_json(&serde_json::json!({"ok": true})).await.unwrap();
        assert_eq!(writer.buffered_body(), br#"{"ok":true}"#);

        let response = writer.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_streaming_frames() {
        let (tx, rx) = mpsc::channel(8);
        let mut writer = ClientWriter::streaming(tx);
        object_data(&mut writer, &serde_json::json!({"a": 1})).await.unwrap();
        claude_data(&mut writer, &ClaudeStreamEvent::MessageStop).await.unwrap();
        done(&mut writer).await.unwrap();
        drop(writer);

        let out = drain(rx).await;
        assert_eq!(
            out,
            "data: {\"a\":1}\n\nevent: message_stop\ndata: {\"type\":\"message_stop\"}\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_write_after_client_gone_fails() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut writer = ClientWriter::streaming(tx);
        let err = done(&mut writer).await.unwrap_err();
        assert_eq!(err.status_code, 499);
        assert!(err.local_error);
    }

    #[tokio::test]
    async fn test_next_upstream_stops_waiting_when_client_leaves() {
        let (tx, rx) = mpsc::channel(1);
        let writer = ClientWriter::streaming(tx);
        let mut stalled = futures::stream::pending::<u8>();
        drop(rx);

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            next_upstream(&mut stalled, &writer),
        )
        .await
        .expect("must not wait on a stalled upstream")
        .unwrap_err();
        assert_eq!(err.status_code, 499);
        assert_eq!(err.error.code, "client_gone");
    }

    #[tokio::test]
    async fn test_next_upstream_buffered_reads_through() {
        let writer = ClientWriter::buffered();
        let mut items = futures::stream::iter([1, 2]);
        assert_eq!(next_upstream(&mut items, &writer).await.unwrap(), Some(1));
        assert_eq!(next_upstream(&mut items, &writer).await.unwrap(), Some(2));
        assert_eq!(next_upstream(&mut items, &writer).await.unwrap(), None);
    }
}
