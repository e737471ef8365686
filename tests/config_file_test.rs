//! # 配置文件测试
//!
//! 仓库自带的开发配置必须能通过加载与校验。

use api_relay::config::{ConfigManager, load_config_from_file};
use api_relay::relay::constant::ChannelType;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

#[test]
fn test_dev_config_loads() {
    let config = load_config_from_file(Path::new("config/config.dev.toml")).unwrap();

    assert_eq!(config.server.port, 3000);
    assert!(config.notify.root.is_some());
    assert!(config.channel_of_type(ChannelType::Suno).is_some());

    let ali = config.select_channel("qwen-latest", None).unwrap();
    assert_eq!(ali.channel_type, ChannelType::Ali);
    assert_eq!(ali.upstream_model("qwen-latest"), "qwen-max");
    assert_eq!(ali.effective_base_url(), "https://dashscope.aliyuncs.com");
}

#[test]
fn test_missing_file_is_config_error() {
    let err = load_config_from_file(Path::new("config/does-not-exist.toml")).unwrap_err();
    assert!(err.to_string().contains("does-not-exist"));
}

#[tokio::test]
async fn test_invalid_channel_rejected_on_load() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[channels]]
id = 1
type = "openai"
models = []
"#
    )
    .unwrap();

    assert!(ConfigManager::from_file(file.path(), false).is_err());
}
