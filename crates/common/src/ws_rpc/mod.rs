/// WebSocket RPC 模块
/// 
/// 单连接之上的请求/响应与推送订阅：消息封包、错误码、帧编解码

pub mod codec;
pub mod error;
pub mod message;

pub use error::{RpcError, RpcErrorCode};
pub use message::{send_method, MethodKind, RpcMessage, RECEIVE_PREFIX, SEND_PREFIX};
