//! # API Relay
//!
//! 多厂商 LLM API 转发核心库：接收 OpenAI / Claude 协议的请求，转发到各厂商上游，
//! 并把上游响应（包括流式响应）逐帧转换回客户端协议。

pub mod config;
pub mod dto;
pub mod error;
pub mod logging;
pub mod notification;
pub mod relay;
pub mod server;
pub mod testing;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{RelayError, Result};
