/// WebSocket RPC 消息定义

use serde::{Deserialize, Serialize};

use crate::utils::generate_id;

/// 请求方法前缀（响应会原样回显方法名和 ID）
pub const SEND_PREFIX: &str = "send_";

/// 推送事件方法前缀
pub const RECEIVE_PREFIX: &str = "receive_";

/// 方法方向，由方法名前缀决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// `send_*`：请求及其响应
    Send,
    /// `receive_*`：服务端推送
    Receive,
    /// 无法识别的前缀
    Unknown,
}

impl MethodKind {
    /// 根据方法名判断方向
    pub fn of(method: &str) -> Self {
        if method.starts_with(SEND_PREFIX) {
            Self::Send
        } else if method.starts_with(RECEIVE_PREFIX) {
            Self::Receive
        } else {
            Self::Unknown
        }
    }
}

/// 为请求名加上 `send_` 前缀
///
/// 总是追加前缀，`send_method("send_time")` 得到 `send_send_time`。
pub fn send_method(name: &str) -> String {
    format!("{}{}", SEND_PREFIX, name)
}

/// RPC 消息封包
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    /// 消息唯一ID
    pub id: String,

    /// 方法名（带方向前缀）
    pub method: String,

    /// 消息负载
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// 应用层错误（仅响应时可能有值）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl RpcMessage {
    /// 创建请求消息，ID 自动生成
    pub fn request(method: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: generate_id(),
            method: method.into(),
            payload: Some(payload),
            error: None,
        }
    }

    /// 创建响应消息
    pub fn reply(
        id: impl Into<String>,
        method: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            payload,
            error: None,
        }
    }

    /// 创建错误响应消息
    pub fn error_reply(
        id: impl Into<String>,
        method: impl Into<String>,
        error: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            payload: None,
            error: Some(error),
        }
    }

    /// 创建推送事件消息
    pub fn event(method: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: generate_id(),
            method: method.into(),
            payload: Some(payload),
            error: None,
        }
    }

    /// 方法方向
    pub fn kind(&self) -> MethodKind {
        MethodKind::of(&self.method)
    }

    /// 是否是请求的响应（`send_*`）
    pub fn is_reply(&self) -> bool {
        self.kind() == MethodKind::Send
    }

    /// 是否是推送事件（`receive_*`）
    pub fn is_event(&self) -> bool {
        self.kind() == MethodKind::Receive
    }

    /// 序列化为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 从 JSON 字符串反序列化
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_kind() {
        assert_eq!(MethodKind::of("send_time"), MethodKind::Send);
        assert_eq!(MethodKind::of("receive_tick"), MethodKind::Receive);
        assert_eq!(MethodKind::of("tick"), MethodKind::Unknown);
        assert_eq!(MethodKind::of("sendtime"), MethodKind::Unknown);
    }

    #[test]
    fn test_send_method_always_prefixes() {
        assert_eq!(send_method("time"), "send_time");
        assert_eq!(send_method("send_time"), "send_send_time");
    }

    #[test]
    fn test_request_message() {
        let msg = RpcMessage::request("send_time", json!({"time": 1000}));
        assert!(msg.is_reply());
        assert_eq!(msg.id.len(), 36);
        assert_eq!(msg.payload, Some(json!({"time": 1000})));
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let msg = RpcMessage::reply("a", "send_time", None);
        let json = msg.to_json().unwrap();
        assert_eq!(json, r#"{"id":"a","method":"send_time"}"#);
    }

    #[test]
    fn test_error_reply() {
        let msg = RpcMessage::error_reply("a", "send_time", json!("boom"));
        assert!(msg.payload.is_none());
        assert_eq!(msg.error, Some(json!("boom")));
    }

    #[test]
    fn test_null_error_is_absent() {
        let msg = RpcMessage::from_json(
            r#"{"id":"a","method":"send_time","payload":{"ok":true},"error":null}"#,
        )
        .unwrap();
        assert!(msg.error.is_none());
        assert_eq!(msg.payload, Some(json!({"ok": true})));
    }

    #[test]
    fn test_event_message() {
        let msg = RpcMessage::event("receive_tick", json!({"n": 1}));
        assert!(msg.is_event());
        assert!(!msg.is_reply());
    }
}
