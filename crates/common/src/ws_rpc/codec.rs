/// 消息编解码辅助函数
///
/// 每个文本帧承载一个 JSON 封包，不做批量或分片处理。

use super::{RpcError, RpcMessage};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// 编码 RPC 消息为 JSON 文本
pub fn encode(msg: &RpcMessage) -> Result<String, RpcError> {
    Ok(msg.to_json()?)
}

/// 解码 JSON 文本为 RPC 消息
pub fn decode(text: &str) -> Result<RpcMessage, RpcError> {
    RpcMessage::from_json(text).map_err(RpcError::malformed_frame)
}

/// 包装为 WebSocket 文本帧
pub fn into_frame(text: String) -> WsMessage {
    WsMessage::Text(text)
}

/// 取出帧中的文本，二进制帧按 UTF-8 处理，控制帧返回 None
pub fn frame_text(ws_msg: WsMessage) -> Option<String> {
    match ws_msg {
        WsMessage::Text(text) => Some(text),
        WsMessage::Binary(data) => String::from_utf8(data).ok(),
        _ => None,
    }
}
