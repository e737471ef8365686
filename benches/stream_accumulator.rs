//! # 流式累积基准测试
//!
//! 整体解码与逐帧回退两条路径的开销对比。

use api_relay::relay::constant::RelayMode;
use api_relay::relay::stream::StreamAccumulator;
use api_relay::utils::token_counter::estimate_tokens;
use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;

fn chat_frames(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            json!({
                "id": "chatcmpl-bench",
                "created": 1,
                "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"content": format!("token {i} 你好 ")}}]
            })
            .to_string()
        })
        .collect()
}

/// 累积基准
pub fn accumulate_benchmark(c: &mut Criterion) {
    let frames = chat_frames(512);
    c.bench_function("accumulate_batched_512", |b| {
        b.iter(|| {
            let mut acc = StreamAccumulator::new();
            acc.accumulate(RelayMode::ChatCompletions, black_box(&frames));
            black_box(acc.final_usage(10))
        });
    });

    // 中间插入一帧坏数据，迫使整体解码失败后逐帧解码
    let mut broken = chat_frames(512);
    broken.insert(256, "{broken".to_string());
    c.bench_function("accumulate_fallback_512", |b| {
        b.iter(|| {
            let mut acc = StreamAccumulator::new();
            acc.accumulate(RelayMode::ChatCompletions, black_box(&broken));
            black_box(acc.final_usage(10))
        });
    });

    let text = "The quick brown fox 跳过了懒狗 ".repeat(200);
    c.bench_function("estimate_tokens_mixed", |b| {
        b.iter(|| estimate_tokens(black_box(&text)));
    });
}

criterion_group!(benches, accumulate_benchmark);
criterion_main!(benches);
