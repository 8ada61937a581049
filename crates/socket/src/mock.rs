/// 内存中的模拟连接
///
/// 不做任何网络 I/O，由调用方手动驱动连接状态和收到的帧，用于测试连接管理器。

use common::ws_rpc::codec;
use common::{RpcError, RpcMessage};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::transport::{
    CloseEvent, Connector, HandlerSlots, ReadyState, Transport, TransportHandlers,
};

/// 模拟连接工厂，记录每一次打开的连接
#[derive(Clone, Default)]
pub struct MockConnector {
    opened: Arc<Mutex<Vec<Arc<MockTransport>>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已打开的连接数
    pub fn opened(&self) -> usize {
        self.opened.lock().len()
    }

    /// 第 index 次打开的连接
    pub fn transport(&self, index: usize) -> Option<Arc<MockTransport>> {
        self.opened.lock().get(index).cloned()
    }

    /// 最近一次打开的连接
    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.opened.lock().last().cloned()
    }
}

impl Connector for MockConnector {
    fn open(&self, url: &str, token: Option<&str>, handlers: TransportHandlers) -> Arc<dyn Transport> {
        let transport = Arc::new(MockTransport {
            url: url.to_owned(),
            token: token.map(str::to_owned),
            state: Mutex::new(ReadyState::Connecting),
            slots: HandlerSlots::new(handlers),
            sent: Mutex::new(Vec::new()),
            closed_with: Mutex::new(None),
        });
        self.opened.lock().push(transport.clone());
        transport
    }
}

/// 模拟连接
pub struct MockTransport {
    url: String,
    token: Option<String>,
    state: Mutex<ReadyState>,
    slots: HandlerSlots,
    sent: Mutex<Vec<String>>,
    closed_with: Mutex<Option<CloseEvent>>,
}

impl MockTransport {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// 握手完成，进入 Open 状态
    pub fn accept(&self) {
        *self.state.lock() = ReadyState::Open;
    }

    /// 收到一个文本帧
    pub fn receive(&self, text: &str) {
        self.slots.fire_message(text.to_owned());
    }

    pub fn receive_message(&self, msg: &RpcMessage) {
        if let Ok(text) = codec::encode(msg) {
            self.slots.fire_message(text);
        }
    }

    /// 对端关闭或网络断开
    pub fn drop_connection(&self, code: u16, reason: &str) {
        *self.state.lock() = ReadyState::Closed;
        self.slots.fire_close(CloseEvent::new(code, reason));
    }

    /// 连接出错，不触发关闭回调
    pub fn fail(&self, error: &str) {
        *self.state.lock() = ReadyState::Closed;
        self.slots.fire_error(error.to_owned());
    }

    /// 已发送的原始帧
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// 已发送的帧，跳过无法解析的部分
    pub fn sent_messages(&self) -> Vec<RpcMessage> {
        self.sent
            .lock()
            .iter()
            .filter_map(|text| codec::decode(text).ok())
            .collect()
    }

    /// 本地调用 close() 时使用的状态码和原因
    pub fn closed_with(&self) -> Option<CloseEvent> {
        self.closed_with.lock().clone()
    }
}

impl Transport for MockTransport {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }

    fn send(&self, text: String) -> Result<(), RpcError> {
        if self.ready_state() != ReadyState::Open {
            return Err(RpcError::connection_closed());
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        let event = CloseEvent::new(code, reason);
        *self.state.lock() = ReadyState::Closed;
        *self.closed_with.lock() = Some(event.clone());
        // 与浏览器一致：本地关闭同样会触发关闭回调（若未被摘除）
        self.slots.fire_close(event);
    }

    fn detach_close_handler(&self) {
        self.slots.detach_close();
    }
}
