//! # Token 估算
//!
//! 上游未返回用量时的近似计数：CJK 字符按 1 token 计，其余字符约 4 个计 1 token。

/// 每个工具调用额外计入的补全 token
pub const TOKENS_PER_TOOL_CALL: u32 = 7;

/// 估算文本的 token 数
pub fn estimate_tokens(text: &str) -> u32 {
    let mut cjk = 0u32;
    let mut other = 0u32;
    for ch in text.chars() {
        if is_cjk(ch) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    cjk + other.div_ceil(4)
}

/// 估算补全 token：文本 + 每个工具调用的固定开销
pub fn estimate_completion_tokens(text: &str, tool_count: usize) -> u32 {
    let tools = u32::try_from(tool_count).unwrap_or(u32::MAX);
    estimate_tokens(text).saturating_add(tools.saturating_mul(TOKENS_PER_TOOL_CALL))
}

const fn is_cjk(ch: char) -> bool {
    matches!(ch as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x3040..=0x30FF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF)
}
