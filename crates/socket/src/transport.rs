/// 传输层边界
///
/// 连接管理器只通过这里的 trait 与具体的 WebSocket 实现交互，
/// 事件以三个回调（消息、关闭、错误）的形式在打开连接时注册。

use common::RpcError;
use parking_lot::Mutex;
use std::sync::Arc;

/// 正常关闭
pub const NORMAL_CLOSURE: u16 = 1000;

/// 对端关闭时没有携带状态码
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// 异常断开（没有关闭握手）
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// 关闭事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
}

impl CloseEvent {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// 没有关闭握手的异常断开
    pub fn abnormal() -> Self {
        Self::new(ABNORMAL_CLOSURE, "")
    }
}

pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;
pub type CloseHandler = Arc<dyn Fn(CloseEvent) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;

/// 打开连接时注册的回调集合
#[derive(Clone)]
pub struct TransportHandlers {
    pub on_message: MessageHandler,
    pub on_close: CloseHandler,
    pub on_error: ErrorHandler,
}

/// 一条已打开（或正在打开）的连接
pub trait Transport: Send + Sync {
    /// 当前连接状态
    fn ready_state(&self) -> ReadyState;

    /// 发送一个文本帧，仅在 Open 状态下成功
    fn send(&self, text: String) -> Result<(), RpcError>;

    /// 以指定状态码关闭连接，不等待对端确认
    fn close(&self, code: u16, reason: &str);

    /// 摘除关闭回调，之后的关闭不会再通知管理器
    fn detach_close_handler(&self);
}

/// 连接工厂
///
/// `open` 必须立即返回处于 Connecting 状态的连接，回调只能在之后异步触发，
/// 不能在 `open` 内部同步调用。
pub trait Connector: Send + Sync {
    fn open(&self, url: &str, token: Option<&str>, handlers: TransportHandlers) -> Arc<dyn Transport>;
}

/// 传输实现内部使用的回调槽位
///
/// 关闭回调最多触发一次，也可以被提前摘除。
pub struct HandlerSlots {
    on_message: MessageHandler,
    on_close: Mutex<Option<CloseHandler>>,
    on_error: ErrorHandler,
}

impl HandlerSlots {
    pub fn new(handlers: TransportHandlers) -> Self {
        Self {
            on_message: handlers.on_message,
            on_close: Mutex::new(Some(handlers.on_close)),
            on_error: handlers.on_error,
        }
    }

    pub fn fire_message(&self, text: String) {
        (self.on_message)(text);
    }

    pub fn fire_error(&self, error: String) {
        (self.on_error)(error);
    }

    pub fn fire_close(&self, event: CloseEvent) {
        // 先取出再调用，回调内部可以安全地再次访问本连接
        let handler = self.on_close.lock().take();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn detach_close(&self) {
        self.on_close.lock().take();
    }
}
