/// 配置管理

use common::utils::is_websocket_url;
use common::{Error, Result};
use socket::SocketConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub socket_url: String,
    pub socket_token: Option<String>,
    pub reconnect_delay_ms: u64,
    pub post_timeout_secs: u64,
    pub log_level: String,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let socket_url = lookup("SOCKET_URL")
            .unwrap_or_else(|| "wss://echo.websocket.org".to_string());
        if !is_websocket_url(&socket_url) {
            return Err(Error::Config(format!("SOCKET_URL 必须是 ws:// 或 wss:// 地址: {}", socket_url)));
        }

        let socket_token = lookup("SOCKET_TOKEN").filter(|t| !t.is_empty());

        let reconnect_delay_ms = lookup("RECONNECT_DELAY_MS")
            .unwrap_or_else(|| "1000".to_string())
            .parse()
            .map_err(|e| Error::Config(format!("RECONNECT_DELAY_MS 无效: {}", e)))?;

        let post_timeout_secs = lookup("POST_TIMEOUT_SECS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .map_err(|e| Error::Config(format!("POST_TIMEOUT_SECS 无效: {}", e)))?;

        let log_level = lookup("LOG_LEVEL")
            .unwrap_or_else(|| "debug".to_string());

        Ok(Self {
            socket_url,
            socket_token,
            reconnect_delay_ms,
            post_timeout_secs,
            log_level,
        })
    }

    pub fn socket_config(&self) -> SocketConfig {
        let config = SocketConfig::new(&self.socket_url)
            .with_reconnect_delay(Duration::from_millis(self.reconnect_delay_ms));

        match &self.socket_token {
            Some(token) => config.with_token(token),
            None => config,
        }
    }

    pub fn post_timeout(&self) -> Duration {
        Duration::from_secs(self.post_timeout_secs)
    }
}
