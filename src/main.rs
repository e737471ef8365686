//! # API Relay 主程序
//!
//! 多厂商 LLM API 转发服务

use api_relay::{
    Result,
    config::{self, ConfigManager},
    logging,
    notification::UnconfiguredMailer,
    server,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// 多厂商 LLM API 转发服务
#[derive(Parser, Debug)]
#[command(name = "api-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 配置文件路径，缺省读取 `API_RELAY_CONFIG_PATH` 或 `config/config.{RUST_ENV}.toml`
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 日志级别（trace、debug、info、warn、error），`RUST_LOG` 优先
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 只校验配置后退出
    #[arg(long)]
    check: bool,

    /// 关闭配置文件热重载
    #[arg(long)]
    no_watch: bool,

    /// 打印日志配置说明后退出
    #[arg(long)]
    log_help: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.log_help {
        logging::print_logging_help();
        return Ok(());
    }

    logging::init_logging(Some(&cli.log_level));

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    info!(component = "relay.main", path = %config_path.display(), "加载配置");

    if cli.check {
        let loaded = config::load_config_from_file(&config_path)?;
        info!(
            component = "relay.main",
            channels = loaded.channels.len(),
            models = loaded.all_models().len(),
            "配置校验通过"
        );
        return Ok(());
    }

    let manager = Arc::new(ConfigManager::from_file(&config_path, !cli.no_watch)?);

    if let Err(e) = server::serve(manager, Arc::new(UnconfiguredMailer)).await {
        error!(component = "relay.main", error = %e, "服务启动失败");
        return Err(e);
    }

    info!(component = "relay.main", "服务正常关闭");
    Ok(())
}
