/// WS Socket - Console
///
/// 命令行宿主程序：读取标准输入的命令，驱动连接管理器并展示日志

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod commands;
mod config;

use commands::{Command, HELP};
use socket::{LogColor, LogSink, MemoryLog, Socket, WsConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();
    let cfg = config::Config::from_env()?;

    // 初始化日志
    // 可以通过环境变量 RUST_LOG 覆盖 LOG_LEVEL，例如：
    // RUST_LOG=socket=debug cargo run
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level))
        )
        .init();

    info!("🚀 启动 WS Socket Console...");
    info!("✅ 配置加载成功: {}", cfg.socket_url);

    let log = MemoryLog::new();
    let socket = Socket::with_transport(
        cfg.socket_config(),
        Arc::new(WsConnector::new()),
        Arc::new(log.clone()),
    );

    let tick_log = log.clone();
    let _ticks = socket.subscribe("receive_tick", move |payload| {
        tick_log.log(
            &format!("Tick {}", payload.unwrap_or(serde_json::Value::Null)),
            None,
        );
    });

    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match command {
            Command::Connect => socket.connect(),
            Command::Close => socket.close(),
            Command::Post => {
                let reply = socket.post(
                    "time",
                    serde_json::json!({ "time": chrono::Utc::now().timestamp_millis() }),
                );
                let log = log.clone();
                let timeout = cfg.post_timeout();

                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, reply).await {
                        Ok(Ok(_)) => log.log("SENT!", None),
                        Ok(Err(e)) => log.log(&e.message, Some(LogColor::Red)),
                        Err(_) => log.log("Timeout", Some(LogColor::Red)),
                    }
                });
            }
            Command::Status => {
                println!(
                    "connected={}, pending={}",
                    socket.connected(),
                    socket.pending_count()
                );
            }
            Command::Logs => {
                for entry in log.entries() {
                    println!("{}", commands::format_entry(&entry));
                }
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => break,
        }
    }

    socket.close();
    info!("👋 Console 已退出");

    Ok(())
}
