//! DashScope 原生接口数据结构

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliEmbeddingRequest {
    pub model: String,
    pub input: AliEmbeddingInput,
    #[serde(default)]
    pub parameters: AliEmbeddingParameters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliEmbeddingInput {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliEmbeddingParameters {
    pub text_type: String,
}

impl Default for AliEmbeddingParameters {
    fn default() -> Self {
        Self {
            text_type: "query".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliEmbeddingResponse {
    #[serde(default)]
    pub output: AliEmbeddingOutput,
    #[serde(default)]
    pub usage: AliUsage,
    #[serde(flatten)]
    pub error: AliError,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliEmbeddingOutput {
    #[serde(default)]
    pub embeddings: Vec<AliEmbedding>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliEmbedding {
    pub text_index: u32,
    pub embedding: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AliUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// 原生接口的错误字段，成功时为空
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: String,
}

impl AliError {
    pub fn is_error(&self) -> bool {
        !self.code.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliImageRequest {
    pub model: String,
    pub input: AliImageInput,
    pub parameters: AliImageParameters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliImageInput {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliImageParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

/// 图像任务状态
pub const TASK_SUCCEEDED: &str = "SUCCEEDED";
pub const TASK_FAILED: &str = "FAILED";
pub const TASK_UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliTaskResponse {
    #[serde(default)]
    pub output: AliTaskOutput,
    #[serde(flatten)]
    pub error: AliError,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliTaskOutput {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub task_status: String,
    #[serde(default)]
    pub results: Vec<AliImageResult>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliImageResult {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
