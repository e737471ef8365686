//! # 转发核心
//!
//! 适配器契约、厂商实现、流式转换引擎与错误规范化。
//! 请求分类后由 [`registry`] 选出适配器，适配器发起上游调用并把响应写回客户端。

pub mod adaptor;
pub mod channel;
pub mod common_handler;
pub mod constant;
pub mod convert;
pub mod error;
pub mod helper;
pub mod info;
pub mod registry;
pub mod stream;

pub use adaptor::{Adaptor, RequestBody, TaskAdaptor};
pub use constant::{ApiType, ChannelType, RelayFormat, RelayMode, TaskPlatform};
pub use error::{ClaudeErrorWithStatusCode, OpenAIErrorWithStatusCode, TaskError};
pub use helper::ClientWriter;
pub use info::{ClientContext, RelayInfo, TaskRelayInfo};
pub use registry::{get_adaptor, get_task_adaptor};
