//! # 适配器注册表
//!
//! 按适配器族登记构造函数，每次请求新建实例。厂商分支只出现在这里。

use std::collections::HashMap;
use std::sync::LazyLock;

use super::adaptor::{Adaptor, TaskAdaptor};
use super::channel::ali::AliAdaptor;
use super::channel::anthropic::AnthropicAdaptor;
use super::channel::jina::JinaAdaptor;
use super::channel::openai::OpenAIAdaptor;
use super::channel::task::suno::SunoAdaptor;
use super::channel::xinference::XinferenceAdaptor;
use super::constant::{ApiType, TaskPlatform};

type AdaptorFactory = fn() -> Box<dyn Adaptor>;
type TaskAdaptorFactory = fn() -> Box<dyn TaskAdaptor>;

static ADAPTORS: LazyLock<HashMap<ApiType, AdaptorFactory>> = LazyLock::new(|| {
    let mut map: HashMap<ApiType, AdaptorFactory> = HashMap::new();
    map.insert(ApiType::OpenAI, || Box::new(OpenAIAdaptor));
    map.insert(ApiType::Anthropic, || Box::new(AnthropicAdaptor));
    map.insert(ApiType::Ali, || Box::new(AliAdaptor));
    map.insert(ApiType::Jina, || Box::new(JinaAdaptor));
    map.insert(ApiType::Xinference, || Box::new(XinferenceAdaptor));
    map
});

static TASK_ADAPTORS: LazyLock<HashMap<TaskPlatform, TaskAdaptorFactory>> = LazyLock::new(|| {
    let mut map: HashMap<TaskPlatform, TaskAdaptorFactory> = HashMap::new();
    map.insert(TaskPlatform::Suno, || Box::new(SunoAdaptor));
    map
});

/// 新建同步转发适配器
pub fn get_adaptor(api_type: ApiType) -> Option<Box<dyn Adaptor>> {
    ADAPTORS.get(&api_type).map(|factory| factory())
}

/// 新建任务适配器
pub fn get_task_adaptor(platform: TaskPlatform) -> Option<Box<dyn TaskAdaptor>> {
    TASK_ADAPTORS.get(&platform).map(|factory| factory())
}
