//! # Rerank 数据结构（Jina 形态）

use super::openai::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 重排序请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RerankRequest {
    pub model: String,
    pub query: String,
    pub documents: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_documents: Option<bool>,
}

impl RerankRequest {
    pub fn return_documents(&self) -> bool {
        self.return_documents.unwrap_or(false)
    }

    pub fn prompt_text(&self) -> String {
        let mut text = self.query.clone();
        for doc in &self.documents {
            text.push('\n');
            match doc {
                Value::String(s) => text.push_str(s),
                other => text.push_str(&other.to_string()),
            }
        }
        text
    }
}

/// 重排序响应
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RerankResponse {
    pub results: Vec<RerankResult>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RerankResult {
    pub index: usize,
    pub relevance_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
}
