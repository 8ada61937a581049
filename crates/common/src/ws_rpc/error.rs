/// WebSocket RPC 错误定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// RPC 错误码
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RpcErrorCode {
    /// 调用时没有已打开的连接
    NotConnected,
    /// 请求所在的连接已断开
    ConnectionClosed,
    /// 收到无法解析的帧
    MalformedFrame,
    /// 服务端在响应中返回了 error 字段
    ApplicationError,
    SerializationError,
}

impl RpcErrorCode {
    /// 转换为字符串码
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::MalformedFrame => "MALFORMED_FRAME",
            Self::ApplicationError => "APPLICATION_ERROR",
            Self::SerializationError => "SERIALIZATION_ERROR",
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// RPC 错误
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: RpcErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl RpcError {
    /// 创建新的 RPC 错误
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// 创建带详情的 RPC 错误
    pub fn with_details(
        code: RpcErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    /// 连接未建立
    pub fn not_connected() -> Self {
        Self::new(RpcErrorCode::NotConnected, "No connection")
    }

    /// 连接关闭错误
    pub fn connection_closed() -> Self {
        Self::new(RpcErrorCode::ConnectionClosed, "连接已关闭")
    }

    /// 帧解析失败
    pub fn malformed_frame(err: impl fmt::Display) -> Self {
        Self::new(
            RpcErrorCode::MalformedFrame,
            format!("无法解析的帧: {}", err),
        )
    }

    /// 服务端返回的应用层错误，原始错误值保存在 details 中
    pub fn application(error: serde_json::Value) -> Self {
        let message = match &error {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string()),
            other => other.to_string(),
        };
        Self::with_details(RpcErrorCode::ApplicationError, message, error)
    }

    /// 序列化错误
    pub fn serialization_error(err: impl fmt::Display) -> Self {
        Self::new(
            RpcErrorCode::SerializationError,
            format!("序列化错误: {}", err),
        )
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_error(err)
    }
}

impl From<RpcError> for crate::Error {
    fn from(err: RpcError) -> Self {
        crate::Error::Rpc(err.to_string())
    }
}
