//! # 异步任务数据结构

use serde::{Deserialize, Serialize};

/// 上游任务接口的通用信封 `{code, message, data}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResponse<T> {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    pub data: T,
}

impl<T> TaskResponse<T> {
    pub fn is_success(&self) -> bool {
        self.code == "success"
    }
}

/// Suno 提交请求
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SunoSubmitReq {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gpt_description_prompt: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mv: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_at: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub continue_clip_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make_instrumental: Option<bool>,
}

/// Suno 查询请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SunoFetchReq {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
}
