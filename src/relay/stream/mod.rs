//! # 流式转换引擎
//!
//! 上游事件流逐帧解码、累积并重编码为客户端协议的帧，保持源顺序，每帧立即写出。

pub mod accumulator;
pub mod claude_to_openai;
pub mod openai_to_claude;

pub use accumulator::{DecodeOutcome, StreamAccumulator, decode_frames};
pub use claude_to_openai::ClaudeStreamState;
pub use openai_to_claude::stream_response_openai_to_claude;
