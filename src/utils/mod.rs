//! # 通用工具

pub mod event_stream;
pub mod token_counter;
