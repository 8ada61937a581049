/// WebSocket 连接管理器
///
/// 在单条连接上提供两种通道：
/// - `post`：请求/响应，按请求 ID 关联 `send_*` 响应
/// - `subscribe`：推送订阅，按方法名分发 `receive_*` 事件
///
/// 连接意外断开或出错时，只要没有调用过 `close()`，就在固定延迟后重连，不限次数。
///
/// 所有可变状态（当前连接、重连标记、重连定时器、待响应请求表、订阅表）
/// 由同一把锁保护；持锁期间不会调用任何回调，也不会 await。

use common::utils::generate_id;
use common::ws_rpc::{codec, send_method};
use common::{MethodKind, RpcError, RpcMessage};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sink::{LogColor, LogSink, TracingLog};
use crate::transport::{
    CloseEvent, Connector, ReadyState, Transport, TransportHandlers, NORMAL_CLOSURE,
};
use crate::ws::WsConnector;

/// 默认重连延迟（毫秒）
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// 连接管理器配置
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// 连接地址（ws:// 或 wss://）
    pub url: String,

    /// 连接时携带的凭证
    pub token: Option<String>,

    /// 断线后重连前的等待时间
    pub reconnect_delay: Duration,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

type Callback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// RPC 响应等待器
type ReplyWaiter = oneshot::Sender<Result<Option<Value>, RpcError>>;

/// 待响应的请求
struct PendingRequest {
    /// 发出请求的连接代数
    generation: u64,
    waiter: ReplyWaiter,
}

struct State {
    /// 当前连接
    current: Option<Arc<dyn Transport>>,

    /// 当前连接的代数，连接被丢弃后为 None
    live: Option<u64>,

    /// 已打开过的连接数
    generation: u64,

    /// 重连意图
    reconnect: bool,

    /// 取消所有尚未触发的重连定时器
    reconnect_token: CancellationToken,

    /// request_id -> 等待器
    pending: HashMap<String, PendingRequest>,

    /// method -> (subscription_id -> callback)
    subs: HashMap<String, HashMap<String, Callback>>,
}

impl State {
    fn take_pending(&mut self, generation: Option<u64>) -> Vec<ReplyWaiter> {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, req)| generation.map_or(true, |g| req.generation == g))
            .map(|(id, _)| id.clone())
            .collect();

        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .map(|req| req.waiter)
            .collect()
    }
}

struct Inner {
    config: SocketConfig,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn LogSink>,
    state: Mutex<State>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.reconnect_token.cancel();
        if let Some(transport) = state.current.take() {
            transport.detach_close_handler();
            transport.close(NORMAL_CLOSURE, "");
        }
    }
}

/// 连接管理器
///
/// 克隆开销很小，所有克隆共享同一条连接和状态。
#[derive(Clone)]
pub struct Socket {
    inner: Arc<Inner>,
}

impl Socket {
    /// 使用 tokio-tungstenite 连接，日志转发到 tracing
    pub fn new(config: SocketConfig) -> Self {
        Self::with_transport(config, Arc::new(WsConnector::new()), Arc::new(TracingLog))
    }

    /// 指定连接工厂和日志接收方
    pub fn with_transport(
        config: SocketConfig,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                sink,
                state: Mutex::new(State {
                    current: None,
                    live: None,
                    generation: 0,
                    reconnect: false,
                    reconnect_token: CancellationToken::new(),
                    pending: HashMap::new(),
                    subs: HashMap::new(),
                }),
            }),
        }
    }

    /// 打开新连接并开启自动重连
    ///
    /// 之前的连接不会被显式关闭，只是不再被引用；重新连接前应先调用 `close()`。
    /// 需要在 Tokio 运行时中调用。
    pub fn connect(&self) {
        self.log("Connect", Some(LogColor::Green));

        let generation = {
            let mut state = self.inner.state.lock();
            state.reconnect = true;
            state.generation += 1;
            state.current = None;
            state.live = Some(state.generation);
            state.generation
        };

        let config = &self.inner.config;
        info!("🔌 连接到 {} (第 {} 次)", config.url, generation);

        let transport = self.inner.connector.open(
            &config.url,
            config.token.as_deref(),
            self.handlers(generation),
        );

        let mut state = self.inner.state.lock();
        if state.live == Some(generation) {
            state.current = Some(transport);
        } else {
            debug!("连接在保存前已失效: generation={}", generation);
        }
    }

    /// 停止自动重连并关闭当前连接
    ///
    /// 未完成的请求以 ConnectionClosed 失败。
    pub fn close(&self) {
        self.log("Close", None);

        let (transport, orphans) = {
            let mut state = self.inner.state.lock();
            state.reconnect = false;
            state.reconnect_token.cancel();
            state.reconnect_token = CancellationToken::new();
            state.live = None;
            (state.current.take(), state.take_pending(None))
        };

        if let Some(transport) = transport {
            // 主动关闭不走重连路径
            transport.detach_close_handler();
            transport.close(NORMAL_CLOSURE, "");
            info!("连接已关闭");
        }

        reject_all(orphans);
    }

    /// 当前连接是否处于 Open 状态
    pub fn connected(&self) -> bool {
        let state = self.inner.state.lock();
        state
            .current
            .as_ref()
            .map_or(false, |transport| transport.ready_state() == ReadyState::Open)
    }

    /// 发送请求并等待响应
    ///
    /// 请求在调用时立即发出，线上方法名为 `send_{method}`。
    /// 没有已打开的连接时返回 NotConnected，不发送任何帧。
    /// 响应带 error 字段时返回 ApplicationError，否则返回响应的 payload。
    /// 本方法不设超时，需要时由调用方自行包一层 `tokio::time::timeout`。
    pub fn post(
        &self,
        method: &str,
        payload: Value,
    ) -> impl Future<Output = Result<Option<Value>, RpcError>> + Send + 'static {
        self.log("Post", None);
        let sent = self.send_request(method, payload);

        async move {
            let rx = sent?;
            rx.await
                .unwrap_or_else(|_| Err(RpcError::connection_closed()))
        }
    }

    /// 订阅推送事件
    ///
    /// 同一方法可以订阅多次，每次都是独立的订阅。
    pub fn subscribe<F>(&self, method: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        let method = method.into();
        let id = generate_id();

        if MethodKind::of(&method) != MethodKind::Receive {
            warn!("订阅的方法不是 receive_* 前缀，不会收到推送: {}", method);
        }

        self.inner
            .state
            .lock()
            .subs
            .entry(method.clone())
            .or_default()
            .insert(id.clone(), Arc::new(callback));

        debug!("新增订阅: method={}, id={}", method, id);

        Subscription {
            inner: Arc::downgrade(&self.inner),
            method,
            id,
        }
    }

    /// 获取待处理请求数量
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// 获取某个方法的订阅数量
    pub fn subscriber_count(&self, method: &str) -> usize {
        self.inner
            .state
            .lock()
            .subs
            .get(method)
            .map_or(0, HashMap::len)
    }

    fn log(&self, message: &str, color: Option<LogColor>) {
        self.inner.sink.log(message, color);
    }

    fn send_request(
        &self,
        method: &str,
        payload: Value,
    ) -> Result<oneshot::Receiver<Result<Option<Value>, RpcError>>, RpcError> {
        let msg = RpcMessage::request(send_method(method), payload);
        let text = codec::encode(&msg)?;
        let (tx, rx) = oneshot::channel();

        let transport = {
            let mut state = self.inner.state.lock();
            let (transport, generation) = match (&state.current, state.live) {
                (Some(transport), Some(generation))
                    if transport.ready_state() == ReadyState::Open =>
                {
                    (transport.clone(), generation)
                }
                _ => return Err(RpcError::not_connected()),
            };
            // 先注册再发送，响应不会早于注册到达
            state.pending.insert(
                msg.id.clone(),
                PendingRequest {
                    generation,
                    waiter: tx,
                },
            );
            transport
        };

        debug!("📤 发送请求: method={}, id={}", msg.method, msg.id);

        if let Err(e) = transport.send(text) {
            // 发送失败，移除待处理请求
            self.inner.state.lock().pending.remove(&msg.id);
            warn!("发送请求失败: id={}, error={}", msg.id, e);
            return Err(e);
        }

        Ok(rx)
    }

    fn handlers(&self, generation: u64) -> TransportHandlers {
        let on_message = {
            let weak = Arc::downgrade(&self.inner);
            Arc::new(move |text: String| {
                if let Some(socket) = Socket::upgrade(&weak) {
                    socket.handle_message(&text);
                }
            })
        };

        let on_close = {
            let weak = Arc::downgrade(&self.inner);
            Arc::new(move |event: CloseEvent| {
                if let Some(socket) = Socket::upgrade(&weak) {
                    socket.handle_close(generation, event);
                }
            })
        };

        let on_error = {
            let weak = Arc::downgrade(&self.inner);
            Arc::new(move |error: String| {
                if let Some(socket) = Socket::upgrade(&weak) {
                    socket.handle_error(generation, &error);
                }
            })
        };

        TransportHandlers {
            on_message,
            on_close,
            on_error,
        }
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// 处理收到的帧，无法解析的帧直接丢弃
    fn handle_message(&self, text: &str) {
        let msg = match codec::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("丢弃帧: {}", e);
                return;
            }
        };

        if msg.is_reply() {
            self.resolve(msg);
        } else if msg.is_event() {
            self.dispatch(msg);
        } else {
            debug!("未知方向的消息，忽略: method={}", msg.method);
        }
    }

    /// 唤醒对应的等待器，同一 ID 只会唤醒一次
    fn resolve(&self, msg: RpcMessage) {
        let pending = self.inner.state.lock().pending.remove(&msg.id);

        let Some(pending) = pending else {
            debug!("未找到对应的待响应请求: {}", msg.id);
            return;
        };

        let result = match msg.error {
            Some(error) => {
                warn!("📥 收到错误响应: id={}, error={}", msg.id, error);
                Err(RpcError::application(error))
            }
            None => {
                debug!("📥 收到响应: id={}", msg.id);
                Ok(msg.payload)
            }
        };

        // 调用方可能已放弃等待
        let _ = pending.waiter.send(result);
    }

    fn dispatch(&self, msg: RpcMessage) {
        let callbacks: Vec<Callback> = {
            let state = self.inner.state.lock();
            state
                .subs
                .get(&msg.method)
                .map(|subs| subs.values().cloned().collect())
                .unwrap_or_default()
        };

        debug!("📨 推送: method={}, 订阅数={}", msg.method, callbacks.len());

        for callback in callbacks {
            callback(msg.payload.clone());
        }
    }

    fn handle_close(&self, generation: u64, event: CloseEvent) {
        self.log(&format!("Closed {} {}", event.code, event.reason), Some(LogColor::Red));
        self.drop_transport(generation);
    }

    fn handle_error(&self, generation: u64, error: &str) {
        self.log("Socket error!", Some(LogColor::Red));
        warn!("连接错误: {}", error);
        self.drop_transport(generation);
    }

    /// 连接断开（关闭或出错）后的清理
    ///
    /// 只有当前连接的事件会清空连接并安排重连；过期连接只拒绝它自己的请求。
    fn drop_transport(&self, generation: u64) {
        let (orphans, reconnect) = {
            let mut state = self.inner.state.lock();
            let orphans = state.take_pending(Some(generation));

            if state.live == Some(generation) {
                state.live = None;
                state.current = None;
                let reconnect = state.reconnect.then(|| state.reconnect_token.clone());
                (orphans, reconnect)
            } else {
                debug!("忽略过期连接的事件: generation={}", generation);
                (orphans, None)
            }
        };

        reject_all(orphans);

        if let Some(token) = reconnect {
            self.schedule_reconnect(token);
        }
    }

    fn schedule_reconnect(&self, token: CancellationToken) {
        let delay = self.inner.config.reconnect_delay;
        let weak = Arc::downgrade(&self.inner);
        warn!("{}毫秒后重新连接...", delay.as_millis());

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("重连已取消");
                }
                _ = tokio::time::sleep(delay) => {
                    if let Some(socket) = Socket::upgrade(&weak) {
                        socket.reconnect();
                    }
                }
            }
        });
    }

    /// 定时器触发时再次确认重连意图，已有连接时不再重复打开
    fn reconnect(&self) {
        let should_connect = {
            let state = self.inner.state.lock();
            state.reconnect && state.live.is_none()
        };

        if should_connect {
            self.connect();
        } else {
            debug!("无需重连");
        }
    }
}

fn reject_all(waiters: Vec<ReplyWaiter>) {
    for waiter in waiters {
        let _ = waiter.send(Err(RpcError::connection_closed()));
    }
}

/// 订阅句柄
#[must_use = "丢弃句柄不会取消订阅，需要时调用 unsubscribe()"]
pub struct Subscription {
    inner: Weak<Inner>,
    method: String,
    id: String,
}

impl Subscription {
    /// 取消本次订阅，不影响同一方法的其他订阅
    pub fn unsubscribe(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        let mut state = inner.state.lock();
        if let Some(subs) = state.subs.get_mut(&self.method) {
            subs.remove(&self.id);
            if subs.is_empty() {
                state.subs.remove(&self.method);
            }
        }
        debug!("取消订阅: method={}, id={}", self.method, self.id);
    }
}
