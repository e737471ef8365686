//! 测试：`utils::event_stream` 的 SSE 解析行为（data 保留原始文本）

use api_relay::utils::event_stream::EventStreamData;
use bytes::BytesMut;
use tokio_util::codec::Decoder;

#[test]
fn sse_single_event_basic_json() {
    let mut codec = EventStreamData::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"data: {\"a\":1}\n\n");

    let ev = codec.decode(&mut buf).unwrap().expect("one event");
    assert_eq!(ev.event, None);
    assert_eq!(ev.id, None);
    assert_eq!(ev.retry, None);
    assert_eq!(ev.data, "{\"a\":1}");
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn sse_multi_line_data_and_comment_lines() {
    let mut codec = EventStreamData::new();
    let mut buf = BytesMut::new();
    // 注释行以冒号开头应被忽略；多行 data 应以换行合并
    buf.extend_from_slice(b": keep-alive\n");
    buf.extend_from_slice(b"data: {\n");
    buf.extend_from_slice(b"data:  \"x\": 42\n");
    buf.extend_from_slice(b"data: }\n\n");

    let ev = codec.decode(&mut buf).unwrap().expect("one event");
    assert_eq!(ev.data, "{\n \"x\": 42\n}");
    let v: serde_json::Value = serde_json::from_str(&ev.data).unwrap();
    assert_eq!(v["x"], 42);
}

#[test]
fn sse_cross_chunk_and_crlf() {
    let mut codec = EventStreamData::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"event: content_block_delta\r\n");
    buf.extend_from_slice(b"id: 123\r\n");
    buf.extend_from_slice(b"data: {\"k\":\"v\"}\r\n");
    assert!(codec.decode(&mut buf).unwrap().is_none(), "no complete event yet");

    buf.extend_from_slice(b"\r\n");
    let ev = codec.decode(&mut buf).unwrap().expect("event after boundary");
    assert_eq!(ev.event.as_deref(), Some("content_block_delta"));
    assert_eq!(ev.id.as_deref(), Some("123"));
    assert_eq!(ev.data, "{\"k\":\"v\"}");
}

#[test]
fn sse_line_split_across_chunks() {
    let mut codec = EventStreamData::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"data: {\"choi");
    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.extend_from_slice(b"ces\":[]}\n\n");
    let ev = codec.decode(&mut buf).unwrap().expect("one event");
    assert_eq!(ev.data, "{\"choices\":[]}");
}

#[test]
fn sse_done_marker_is_preserved() {
    let mut codec = EventStreamData::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"data: [DONE]\n\n");
    let ev = codec.decode(&mut buf).unwrap().expect("one event");
    assert!(ev.is_done());
}

#[test]
fn sse_eof_flushes_unterminated_event() {
    let mut codec = EventStreamData::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"data: {\"a\":1}\n\ndata: {\"b\":2}");

    let first = codec.decode_eof(&mut buf).unwrap().expect("first event");
    assert_eq!(first.data, "{\"a\":1}");
    let second = codec.decode_eof(&mut buf).unwrap().expect("trailing event");
    assert_eq!(second.data, "{\"b\":2}");
    assert!(codec.decode_eof(&mut buf).unwrap().is_none());
}

#[test]
fn sse_retry_field_parsed() {
    let mut codec = EventStreamData::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"retry: 3000\ndata: x\n\n");
    let ev = codec.decode(&mut buf).unwrap().expect("one event");
    assert_eq!(ev.retry, Some(3000));
    assert_eq!(ev.data, "x");
}

#[test]
fn sse_invalid_utf8_line_dropped_and_decoding_continues() {
    let mut codec = EventStreamData::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"data: one\n\n");
    buf.extend_from_slice(b"data: \xff\xfe\n\n");
    buf.extend_from_slice(b"data: two\n\n");

    let first = codec.decode(&mut buf).unwrap().expect("first event");
    assert_eq!(first.data, "one");
    let second = codec.decode(&mut buf).unwrap().expect("event after bad line");
    assert_eq!(second.data, "two");
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"data: \xc3");
    assert!(codec.decode_eof(&mut buf).unwrap().is_none());
}
