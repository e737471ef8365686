//! # SSE 事件流解码器
//!
//! 将上游字节流按 `text/event-stream` 规则切分成事件，`data` 字段保留原始文本，
//! 由上层决定如何解析（OpenAI 的 `[DONE]` 终止标记也作为普通数据交给上层）。

use bytes::BytesMut;
use std::io;
use tokio_util::codec::Decoder;
use tracing::warn;

/// 一个完整的 SSE 事件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStream {
    pub event: Option<String>,
    pub id: Option<String>,
    /// 多行 `data:` 以 `\n` 拼接后的原始文本
    pub data: String,
    pub retry: Option<u64>,
}

impl EventStream {
    /// 是否为 OpenAI 风格的结束标记
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// SSE 解码状态
#[derive(Debug, Clone, Default)]
pub struct EventStreamData {
    current: EventStream,
    has_any: bool,
    has_data: bool,
}

impl EventStreamData {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush(&mut self) -> Option<EventStream> {
        if !self.has_any {
            return None;
        }
        self.has_any = false;
        self.has_data = false;
        Some(std::mem::take(&mut self.current))
    }

    fn process_line(&mut self, line: &str) -> Option<EventStream> {
        if line.is_empty() {
            return self.flush();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_any = true;
                self.has_data = true;
            }
            "event" => {
                self.current.event = Some(value.to_string());
                self.has_any = true;
            }
            "id" => {
                self.current.id = Some(value.to_string());
                self.has_any = true;
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.current.retry = Some(ms);
                }
                self.has_any = true;
            }
            _ => {}
        }
        None
    }

    fn take_one_line(src: &mut BytesMut) -> Option<BytesMut> {
        let pos = src.iter().position(|b| *b == b'\n')?;
        let mut line = src.split_to(pos + 1);
        line.truncate(line.len() - 1);
        if line.ends_with(b"\r") {
            line.truncate(line.len() - 1);
        }
        Some(line)
    }

    /// 非 UTF-8 的行整行丢弃，后续事件照常解码
    fn process_raw_line(&mut self, raw: &[u8]) -> Option<EventStream> {
        match std::str::from_utf8(raw) {
            Ok(line) => self.process_line(line),
            Err(e) => {
                warn!(component = "utils.event_stream", error = %e, len = raw.len(), "丢弃非 UTF-8 的 SSE 行");
                None
            }
        }
    }
}

impl Decoder for EventStreamData {
    type Item = EventStream;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        while let Some(line) = Self::take_one_line(src) {
            if let Some(ev) = self.process_raw_line(&line) {
                return Ok(Some(ev));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        if let Some(ev) = self.decode(src)? {
            return Ok(Some(ev));
        }
        if !src.is_empty() {
            let mut rest = src.split_to(src.len());
            if rest.ends_with(b"\r") {
                rest.truncate(rest.len() - 1);
            }
            if let Some(ev) = self.process_raw_line(&rest) {
                return Ok(Some(ev));
            }
        }
        Ok(self.flush())
    }
}
