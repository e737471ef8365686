//! Xinference 重排序响应

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XinRerankResponse {
    #[serde(default)]
    pub results: Vec<XinRerankResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XinRerankResult {
    pub index: usize,
    pub relevance_score: f64,
    /// 字符串或 `{"text": ...}`，未返回时为空
    #[serde(default)]
    pub document: Option<Value>,
}

impl XinRerankResult {
    /// 上游是否省略了文档
    pub fn document_missing(&self) -> bool {
        match &self.document {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        }
    }
}
