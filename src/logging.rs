//! # 日志配置模块
//!
//! 初始化 tracing 订阅器，并提供日志中使用的脱敏工具

use std::env;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化日志系统
///
/// `RUST_LOG` 优先；否则使用 `log_level`（缺省 `info`）并打开本 crate 的 debug 日志。
pub fn init_logging(log_level: Option<&str>) {
    let log_filter = default_filter(log_level);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// 构建默认过滤规则
fn default_filter(log_level: Option<&str>) -> String {
    let level = log_level.unwrap_or("info");
    format!("{level},api_relay=debug,hyper=warn,reqwest=warn,tower_http=info")
}

/// 密钥脱敏：保留前 4 位与后 4 位
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}***{tail}")
}

/// 环境变量设置指南
pub fn print_logging_help() {
    println!("📋 日志配置指南:");
    println!("  RUST_LOG=info                          # 标准日志级别");
    println!("  RUST_LOG=debug                         # 调试级别");
    println!("  RUST_LOG=info,api_relay::relay=trace   # 追踪转发与流式转换");
    println!("  RUST_LOG=info,tower_http=debug         # 查看每个入站请求");
    if env::var("RUST_LOG").is_ok() {
        println!();
        println!("💡 当前 RUST_LOG 已设置，将覆盖 --log-level");
    }
}
