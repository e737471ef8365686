//! # 渠道实现
//!
//! 每个子模块对应一个上游厂商，`api_request` 为共用的出站调用。

pub mod ali;
pub mod anthropic;
pub mod api_request;
pub mod jina;
pub mod openai;
pub mod task;
pub mod xinference;
