//! 异步任务渠道

pub mod suno;
