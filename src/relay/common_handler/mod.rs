//! # 跨渠道共用的响应处理

pub mod rerank;

pub use rerank::{prepare_rerank_request, rerank_handler};
