//! # 数据传输对象
//!
//! 客户端协议与上游协议共用的请求/响应结构

pub mod claude;
pub mod openai;
pub mod rerank;
pub mod task;

pub use claude::{ClaudeRequest, ClaudeResponse, ClaudeStreamEvent, ClaudeUsage};
pub use openai::{
    AudioRequest, ChatCompletionsStreamResponse, EmbeddingRequest, EmbeddingResponse,
    GeneralOpenAIRequest, ImageRequest, ImageResponse, Message, OpenAIResponsesRequest,
    TextResponse, Usage,
};
pub use rerank::{RerankRequest, RerankResponse};
pub use task::{SunoSubmitReq, TaskResponse};
