/// 基于 tokio-tungstenite 的连接实现
///
/// 每条连接一个后台任务：先完成握手，再在同一个循环里处理发送通道和接收流。
/// 事件顺序与浏览器 WebSocket 一致：出错时先触发错误回调，再以 1006 触发关闭回调。

use common::ws_rpc::codec;
use common::RpcError;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    handshake::client::Request,
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transport::{
    CloseEvent, Connector, HandlerSlots, ReadyState, Transport, TransportHandlers,
    NO_STATUS_RECEIVED,
};

/// WebSocket 连接工厂
///
/// `open` 会 spawn 后台任务，需要在 Tokio 运行时中调用。
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &str, token: Option<&str>, handlers: TransportHandlers) -> Arc<dyn Transport> {
        let (tx, rx) = mpsc::unbounded_channel::<Message>();

        let shared = Arc::new(Shared {
            state: Mutex::new(ReadyState::Connecting),
            slots: HandlerSlots::new(handlers),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(run(
            url.to_owned(),
            token.map(str::to_owned),
            shared.clone(),
            rx,
        ));

        Arc::new(WsTransport { shared, sender: tx })
    }
}

/// 连接句柄与后台任务共享的部分
struct Shared {
    state: Mutex<ReadyState>,
    slots: HandlerSlots,
    /// 握手完成前取消连接
    cancel: CancellationToken,
}

impl Shared {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }

    fn set_state(&self, state: ReadyState) {
        *self.state.lock() = state;
    }

    /// 出错：先通知错误，再以异常断开通知关闭
    fn fail(&self, error: String) {
        self.set_state(ReadyState::Closed);
        self.slots.fire_error(error);
        self.slots.fire_close(CloseEvent::abnormal());
    }

    fn finish(&self, event: CloseEvent) {
        self.set_state(ReadyState::Closed);
        self.slots.fire_close(event);
    }
}

/// WebSocket 连接句柄
///
/// 句柄被释放时后台任务会发送关闭帧并结束。
pub struct WsTransport {
    shared: Arc<Shared>,
    sender: mpsc::UnboundedSender<Message>,
}

impl Transport for WsTransport {
    fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }

    fn send(&self, text: String) -> Result<(), RpcError> {
        if self.ready_state() != ReadyState::Open {
            return Err(RpcError::connection_closed());
        }
        self.sender
            .send(codec::into_frame(text))
            .map_err(|_| RpcError::connection_closed())
    }

    fn close(&self, code: u16, reason: &str) {
        let previous = {
            let mut state = self.shared.state.lock();
            let previous = *state;
            if matches!(previous, ReadyState::Connecting | ReadyState::Open) {
                *state = ReadyState::Closing;
            }
            previous
        };

        match previous {
            ReadyState::Connecting => self.shared.cancel.cancel(),
            ReadyState::Open => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: Cow::Owned(reason.to_owned()),
                };
                if self.sender.send(Message::Close(Some(frame))).is_err() {
                    debug!("发送通道已关闭，忽略关闭请求");
                }
            }
            ReadyState::Closing | ReadyState::Closed => {}
        }
    }

    fn detach_close_handler(&self) {
        self.shared.slots.detach_close();
    }
}

/// 构造握手请求，凭证放在 Sec-WebSocket-Protocol 头中
fn build_request(url: &str, token: Option<&str>) -> Result<Request, tungstenite::Error> {
    let mut request = url.into_client_request()?;

    if let Some(token) = token {
        let value = HeaderValue::from_str(token)
            .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(request)
}

/// 连接任务
async fn run(
    url: String,
    token: Option<String>,
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    let request = match build_request(&url, token.as_deref()) {
        Ok(request) => request,
        Err(e) => {
            error!("无效的连接地址: {}, error={}", url, e);
            shared.fail(e.to_string());
            return;
        }
    };

    let connected = tokio::select! {
        _ = shared.cancel.cancelled() => {
            debug!("握手完成前连接已关闭: {}", url);
            shared.finish(CloseEvent::abnormal());
            return;
        }
        result = connect_async(request) => result,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            error!("连接失败: {}, error={}", url, e);
            shared.fail(e.to_string());
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let closing = {
        let mut state = shared.state.lock();
        if *state == ReadyState::Connecting {
            *state = ReadyState::Open;
        }
        *state == ReadyState::Closing
    };

    if closing {
        // 握手期间已被要求关闭
        if let Err(e) = ws_sender.send(Message::Close(None)).await {
            debug!("发送关闭帧失败: {}", e);
        }
    } else {
        info!("✅ WebSocket 连接成功: {}", url);
    }

    let mut outbound_open = true;
    let mut close_event = CloseEvent::abnormal();

    loop {
        tokio::select! {
            outbound = rx.recv(), if outbound_open => match outbound {
                Some(msg) => {
                    if let Err(e) = ws_sender.send(msg).await {
                        error!("发送消息失败: {}", e);
                        shared.slots.fire_error(e.to_string());
                        break;
                    }
                }
                None => {
                    debug!("连接句柄已释放，发送关闭帧");
                    outbound_open = false;
                    shared.set_state(ReadyState::Closing);
                    if let Err(e) = ws_sender.send(Message::Close(None)).await {
                        debug!("发送关闭帧失败: {}", e);
                    }
                }
            },
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Close(frame))) => {
                    // 收到对端关闭帧后不再允许发送，等待 TCP 断开
                    shared.set_state(ReadyState::Closing);
                    close_event = match frame {
                        Some(frame) => CloseEvent::new(u16::from(frame.code), frame.reason.into_owned()),
                        None => CloseEvent::new(NO_STATUS_RECEIVED, ""),
                    };
                    debug!("收到关闭帧: code={}, reason={}", close_event.code, close_event.reason);
                }
                Some(Ok(msg)) => {
                    if let Some(text) = codec::frame_text(msg) {
                        shared.slots.fire_message(text);
                    }
                }
                Some(Err(e)) => {
                    warn!("接收消息错误: {}", e);
                    shared.slots.fire_error(e.to_string());
                    break;
                }
                None => break,
            },
        }
    }

    debug!("连接任务结束: {}", url);
    shared.finish(close_event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Socket, SocketConfig};
    use crate::sink::MemoryLog;
    use common::{RpcErrorCode, RpcMessage};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, accept_hdr_async};
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Response};

    /// 回显服务：连接建立后推送 receive_hello，收到 send_drop 时以 4000 关闭
    struct EchoServer {
        url: String,
        accepted: Arc<AtomicUsize>,
        protocols: Arc<Mutex<Vec<Option<String>>>>,
    }

    async fn start_echo_server() -> EchoServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let protocols = Arc::new(Mutex::new(Vec::new()));

        let accepted_clone = accepted.clone();
        let protocols_clone = protocols.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted_clone.fetch_add(1, Ordering::SeqCst);
                let protocols = protocols_clone.clone();

                tokio::spawn(async move {
                    let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                        let protocol = req.headers().get(SEC_WEBSOCKET_PROTOCOL).cloned();
                        if let Some(value) = &protocol {
                            resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value.clone());
                        }
                        protocols
                            .lock()
                            .push(protocol.and_then(|v| v.to_str().ok().map(str::to_owned)));
                        Ok(resp)
                    };

                    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                        return;
                    };

                    let hello = RpcMessage::event("receive_hello", json!({"n": 1}));
                    let _ = ws.send(Message::Text(hello.to_json().unwrap())).await;

                    while let Some(Ok(msg)) = ws.next().await {
                        match msg {
                            Message::Text(text) if text.contains("send_drop") => {
                                let frame = CloseFrame {
                                    code: CloseCode::from(4000),
                                    reason: "bye".into(),
                                };
                                let _ = ws.close(Some(frame)).await;
                                break;
                            }
                            Message::Text(text) => {
                                let _ = ws.send(Message::Text(text)).await;
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                });
            }
        });

        EchoServer {
            url: format!("ws://{}", addr),
            accepted,
            protocols,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..300 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_build_request_sets_protocol() {
        let request = build_request("ws://localhost:3000/ws", Some("chat")).unwrap();
        assert_eq!(request.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(), "chat");

        let request = build_request("ws://localhost:3000/ws", None).unwrap();
        assert!(request.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());

        assert!(build_request("not a url", None).is_err());
        assert!(build_request("ws://localhost", Some("bad\nvalue")).is_err());
    }

    #[tokio::test]
    async fn test_round_trip_over_websocket() {
        let server = start_echo_server().await;
        let socket = Socket::new(SocketConfig::new(&server.url).with_token("chat"));

        let hellos = Arc::new(AtomicUsize::new(0));
        let hellos_clone = hellos.clone();
        let _sub = socket.subscribe("receive_hello", move |payload| {
            assert_eq!(payload, Some(json!({"n": 1})));
            hellos_clone.fetch_add(1, Ordering::SeqCst);
        });

        socket.connect();
        assert!(wait_until(|| socket.connected()).await);
        assert!(wait_until(|| hellos.load(Ordering::SeqCst) == 1).await);

        // 回显服务原样返回请求，payload 即响应
        let reply = socket.post("time", json!({"time": 1000})).await.unwrap();
        assert_eq!(reply, Some(json!({"time": 1000})));
        assert_eq!(*server.protocols.lock(), vec![Some("chat".to_string())]);

        socket.close();
        assert!(!socket.connected());
    }

    #[tokio::test]
    async fn test_server_close_triggers_reconnect() {
        let server = start_echo_server().await;
        let log = MemoryLog::new();
        let socket = Socket::with_transport(
            SocketConfig::new(&server.url).with_reconnect_delay(Duration::from_millis(50)),
            Arc::new(WsConnector::new()),
            Arc::new(log.clone()),
        );

        socket.connect();
        assert!(wait_until(|| socket.connected()).await);

        let err = socket.post("drop", json!({})).await.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::ConnectionClosed);
        assert!(log.messages().contains(&"Closed 4000 bye".to_string()));

        assert!(wait_until(|| server.accepted.load(Ordering::SeqCst) == 2 && socket.connected()).await);

        socket.close();
    }

    /// 收到第一条消息后发送关闭帧，但在一段时间内不断开 TCP
    async fn start_lingering_server(linger: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    if let Some(Ok(Message::Text(_))) = ws.next().await {
                        let frame = CloseFrame {
                            code: CloseCode::from(4001),
                            reason: "later".into(),
                        };
                        let _ = ws.send(Message::Close(Some(frame))).await;
                        tokio::time::sleep(linger).await;
                    }
                });
            }
        });

        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_close_frame_stops_sending_before_disconnect() {
        let url = start_lingering_server(Duration::from_secs(2)).await;
        let log = MemoryLog::new();
        let socket = Socket::with_transport(
            SocketConfig::new(&url).with_reconnect_delay(Duration::from_secs(10)),
            Arc::new(WsConnector::new()),
            Arc::new(log.clone()),
        );

        socket.connect();
        assert!(wait_until(|| socket.connected()).await);

        // 触发服务端的关闭帧，回复永远不会到达
        drop(socket.post("linger", json!({})));
        assert!(wait_until(|| !socket.connected()).await);

        // TCP 仍然存活，但连接已不可写
        let err = socket.post("time", json!({})).await.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::NotConnected);
        assert!(!log.messages().iter().any(|m| m == "Socket error!"));

        socket.close();
    }

    #[tokio::test]
    async fn test_dropped_handle_sends_close_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut closed = false;
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Close(_) = msg {
                    closed = true;
                    break;
                }
            }
            let _ = seen_tx.send(closed);
        });

        let handlers = TransportHandlers {
            on_message: Arc::new(|_| {}),
            on_close: Arc::new(|_| {}),
            on_error: Arc::new(|_| {}),
        };
        let transport = WsConnector::new().open(&format!("ws://{}", addr), None, handlers);
        assert!(wait_until(|| transport.ready_state() == ReadyState::Open).await);

        drop(transport);
        let closed = tokio::time::timeout(Duration::from_secs(3), seen_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(closed);
    }

    #[tokio::test]
    async fn test_refused_connection_keeps_retrying() {
        // 先占用再释放端口，得到一个无人监听的地址
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let log = MemoryLog::new();
        let socket = Socket::with_transport(
            SocketConfig::new(format!("ws://{}", addr))
                .with_reconnect_delay(Duration::from_millis(20)),
            Arc::new(WsConnector::new()),
            Arc::new(log.clone()),
        );

        socket.connect();
        let errors = || {
            log.messages()
                .iter()
                .filter(|m| m.as_str() == "Socket error!")
                .count()
        };
        assert!(wait_until(|| errors() >= 3).await);
        assert!(!socket.connected());

        socket.close();
        let settled = errors();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(errors() <= settled + 1);
    }
}
