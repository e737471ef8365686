//! # 上游请求助手
//!
//! 所有适配器共用的出站 HTTP 调用：连接池化的 `reqwest::Client`、超时策略与通用请求头。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::relay::adaptor::{Adaptor, RequestBody, TaskAdaptor};
use crate::relay::error::{OpenAIErrorWithStatusCode, TaskError, openai_error_wrapper, task_error_wrapper};
use crate::relay::info::{ClientContext, RelayInfo, TaskRelayInfo};
use crate::utils::event_stream::EventStreamData;

/// 上游响应体字节流
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// 上游 SSE 事件流
pub type UpstreamEvents = FramedRead<StreamReader<ByteStream, Bytes>, EventStreamData>;

/// 上游响应：状态码、响应头与尚未读取的响应体
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: ByteStream,
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    pub fn from_reqwest(resp: reqwest::Response) -> Self {
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes_stream().map_err(io::Error::other).boxed();
        Self {
            status,
            headers,
            body,
        }
    }

    /// 由完整响应体构造
    pub fn from_bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::from_chunks(status, vec![body.into()])
    }

    /// 由分块响应体构造，分块边界保留到下游解码器
    pub fn from_chunks(status: StatusCode, chunks: Vec<Bytes>) -> Self {
        Self::from_stream(status, stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    /// 由任意字节流构造
    pub fn from_stream(status: StatusCode, body: ByteStream) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// 响应头中的 Content-Type
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// 读取完整响应体
    pub async fn bytes(self) -> io::Result<Bytes> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        if chunks.len() == 1 {
            return Ok(chunks.into_iter().next().unwrap_or_default());
        }
        Ok(Bytes::from(chunks.concat()))
    }

    /// 按 SSE 规则解码响应体
    pub fn into_event_stream(self) -> UpstreamEvents {
        FramedRead::new(StreamReader::new(self.body), EventStreamData::new())
    }

    /// 取出原始字节流
    pub fn into_body(self) -> ByteStream {
        self.body
    }
}

/// 共享的转发 HTTP 客户端
///
/// 超时只作用于非流式请求；流式请求的生命周期由客户端连接决定。
#[derive(Clone, Debug)]
pub struct RelayClient {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl RelayClient {
    /// `timeout_secs == 0` 表示不设超时
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("api-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }

    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new(0)
    }
}

/// 通用请求头：Content-Type 取自请求体，Accept 沿用客户端值，流式请求缺省 `text/event-stream`
pub fn setup_api_request_header(
    info: &RelayInfo,
    ctx: &ClientContext,
    headers: &mut HeaderMap,
    content_type: &str,
) {
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    match ctx.headers.get(header::ACCEPT) {
        Some(accept) => {
            headers.insert(header::ACCEPT, accept.clone());
        }
        None if info.is_stream => {
            headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        None => {}
    }
}

/// 适配器的默认出站调用
pub async fn do_api_request<A: Adaptor + ?Sized>(
    adaptor: &A,
    ctx: &ClientContext,
    info: &RelayInfo,
    body: RequestBody,
) -> Result<UpstreamResponse, OpenAIErrorWithStatusCode> {
    let url = adaptor.get_request_url(info)?;

    let mut headers = HeaderMap::new();
    setup_api_request_header(info, ctx, &mut headers, body.content_type());
    adaptor.setup_request_header(ctx, &mut headers, info);

    let payload = body.into_bytes()?;
    debug!(
        component = "relay.request",
        request_id = %info.request_id,
        channel_id = info.channel_id,
        url = %url,
        stream = info.is_stream,
        bytes = payload.len(),
        "发送上游请求"
    );

    let mut request = ctx.http.client().post(&url).headers(headers).body(payload);
    if !info.is_stream {
        if let Some(timeout) = ctx.http.timeout() {
            request = request.timeout(timeout);
        }
    }

    let resp = request.send().await.map_err(|e| {
        openai_error_wrapper(e, "do_request_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    Ok(UpstreamResponse::from_reqwest(resp))
}

/// 任务适配器的默认出站调用
pub async fn do_task_api_request<A: TaskAdaptor + ?Sized>(
    adaptor: &A,
    ctx: &ClientContext,
    info: &TaskRelayInfo,
    body: Bytes,
) -> Result<UpstreamResponse, TaskError> {
    let url = adaptor.build_request_url(info)?;

    let mut headers = HeaderMap::new();
    adaptor.build_request_header(ctx, &mut headers, info);

    debug!(
        component = "relay.task",
        request_id = %info.request_id,
        channel_id = info.channel_id,
        url = %url,
        action = %info.action,
        "提交上游任务"
    );

    let mut request = ctx.http.client().post(&url).headers(headers).body(body);
    if let Some(timeout) = ctx.http.timeout() {
        request = request.timeout(timeout);
    }

    let resp = request.send().await.map_err(|e| {
        task_error_wrapper(e, "do_request_failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    Ok(UpstreamResponse::from_reqwest(resp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_bytes_concatenates_chunks() {
        let resp = UpstreamResponse::from_chunks(
            StatusCode::OK,
            vec![Bytes::from_static(b"{\"a\":"), Bytes::from_static(b"1}")],
        );
        assert_eq!(resp.bytes().await.unwrap(), Bytes::from_static(b"{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_event_stream_across_chunk_boundaries() {
        let resp = UpstreamResponse::from_chunks(
            StatusCode::OK,
            vec![
                Bytes::from_static(b"data: {\"x\""),
                Bytes::from_static(b":1}\n\ndata: [DO"),
                Bytes::from_static(b"NE]\n\n"),
            ],
        );
        let events: Vec<_> = resp.into_event_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().data, "{\"x\":1}");
        assert!(events[1].as_ref().unwrap().is_done());
    }

    #[test]
    fn test_relay_client_timeout_policy() {
        assert_eq!(RelayClient::new(0).timeout(), None);
        assert_eq!(RelayClient::new(30).timeout(), Some(Duration::from_secs(30)));
    }
}
