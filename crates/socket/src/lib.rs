/// WS Socket - 连接管理器
///
/// 将单条 WebSocket 连接包装为请求/响应通道和推送订阅通道，断线后自动重连

pub mod client;
pub mod mock;
pub mod sink;
pub mod transport;
pub mod ws;

pub use client::{Socket, SocketConfig, Subscription, DEFAULT_RECONNECT_DELAY_MS};
pub use mock::{MockConnector, MockTransport};
pub use sink::{LogColor, LogEntry, LogSink, MemoryLog, TracingLog};
pub use transport::{CloseEvent, Connector, ReadyState, Transport, TransportHandlers};
pub use ws::WsConnector;
