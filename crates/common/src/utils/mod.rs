/// 工具函数集合

use uuid::Uuid;

/// 生成唯一 ID
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// 校验连接地址是否为 WebSocket 地址（ws:// 或 wss://）
pub fn is_websocket_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("wss://")
        .or_else(|| lower.strip_prefix("ws://"));

    matches!(rest, Some(host) if !host.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id1 = generate_id();
        let id2 = generate_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36); // UUID v4 格式
    }

    #[test]
    fn test_is_websocket_url() {
        assert!(is_websocket_url("ws://localhost:3000/ws"));
        assert!(is_websocket_url("wss://echo.websocket.org"));
        assert!(is_websocket_url("WSS://ECHO.WEBSOCKET.ORG"));
        assert!(!is_websocket_url("http://localhost:3000"));
        assert!(!is_websocket_url("ws://"));
        assert!(!is_websocket_url("invalid"));
    }
}
