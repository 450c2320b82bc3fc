//! Socket 传输层
//!
//! 每个登录会话只维持一条 WebSocket 连接。连接由后台任务管理，
//! 失败时按固定间隔有限次重连；所有发送都是即发即弃，未连接时直接丢弃。
//! 本模块只转发事件，不持有任何会话数据。

use crate::chat::error::ChatError;
use crate::chat::types::{ClientEvent, ReadReceipt, ServerEvent, TypingSignal};
use crate::chat::types::Message as ChatMessage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Socket 事件监听器
///
/// 所有回调默认空实现，按需覆盖
#[async_trait]
pub trait ChatEventListener: Send + Sync {
    /// 收到新消息
    async fn on_new_message(&self, _message: ChatMessage) {}

    /// 对方输入状态
    async fn on_typing(&self, _signal: TypingSignal) {}

    /// 已读回执
    async fn on_message_read(&self, _receipt: ReadReceipt) {}

    /// 连接错误、服务器错误
    async fn on_error(&self, _error: ChatError) {}

    /// 连接状态变化
    async fn on_connection_status_changed(&self, _status: ConnectionStatus) {}
}

/// 传输层配置
#[derive(Clone, Debug)]
pub struct SocketConfig {
    pub ws_url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl From<&crate::chat::config::ChatConfig> for SocketConfig {
    fn from(cfg: &crate::chat::config::ChatConfig) -> Self {
        Self {
            ws_url: cfg.ws_url.clone(),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_delay: cfg.reconnect_delay,
        }
    }
}

type Listeners = Mutex<HashMap<u64, Arc<dyn ChatEventListener>>>;

struct SocketInner {
    config: SocketConfig,
    /// 当前连接的发送通道，未连接时为 None
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    status: watch::Sender<ConnectionStatus>,
    listeners: Listeners,
    next_listener_id: AtomicU64,
    /// 每次 disconnect 递增，旧连接任务据此停止
    generation: AtomicU64,
}

/// disconnect 后等待关闭帧写出的时长
const CLOSE_GRACE: Duration = Duration::from_millis(200);

/// 聊天 Socket 客户端
///
/// 克隆开销很小，所有克隆共享同一条连接
#[derive(Clone)]
pub struct ChatSocket {
    inner: Arc<SocketInner>,
}

/// 监听器订阅句柄，丢弃时自动取消订阅
pub struct Subscription {
    id: u64,
    socket: Weak<SocketInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.socket.upgrade() {
            inner.listeners.lock().remove(&self.id);
            debug!("[Socket] 取消订阅监听器: {}", self.id);
        }
    }
}

impl ChatSocket {
    pub fn new(config: SocketConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(SocketInner {
                config,
                outbound: Mutex::new(None),
                task: Mutex::new(None),
                status,
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// 等待连接进入指定状态
    pub async fn wait_for_status(&self, expected: ConnectionStatus) {
        let mut rx = self.inner.status.subscribe();
        // 发送端由 self 持有，不会关闭
        let _ = rx.wait_for(|s| *s == expected).await;
    }

    /// 注册事件监听器
    pub fn subscribe(&self, listener: Arc<dyn ChatEventListener>) -> Subscription {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, listener);
        debug!("[Socket] 注册监听器: {}", id);
        Subscription {
            id,
            socket: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// 建立连接
    ///
    /// 已有连接（或正在连接）时不做任何事；失败通过 `on_error` 回调通知
    pub fn connect(&self, token: &str) {
        let mut task = self.inner.task.lock();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!("[Socket] 连接已存在，忽略 connect");
                return;
            }
        }

        info!("[Socket] 🔗 连接到聊天服务器: {}", self.inner.config.ws_url);
        let inner = self.inner.clone();
        let token = token.to_string();
        let generation = self.inner.generation.load(Ordering::SeqCst);
        *task = Some(tokio::spawn(async move {
            run_connection(inner, token, generation).await;
        }));
    }

    /// 断开连接，未连接时调用也是安全的
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let handle = self.inner.task.lock().take();
        let sender = self.inner.outbound.lock().take();
        let closing = sender
            .map(|tx| tx.send(WsMessage::Close(None)).is_ok())
            .unwrap_or(false);
        if let Some(handle) = handle {
            info!("[Socket] 👋 断开连接");
            match tokio::runtime::Handle::try_current() {
                // 让会话循环写出关闭帧，超时再强制终止
                Ok(rt) if closing => {
                    rt.spawn(async move {
                        let abort = handle.abort_handle();
                        if tokio::time::timeout(CLOSE_GRACE, handle).await.is_err() {
                            abort.abort();
                        }
                    });
                }
                _ => handle.abort(),
            }
        }
        let previous = self.inner.status.send_replace(ConnectionStatus::Disconnected);
        if previous == ConnectionStatus::Disconnected {
            return;
        }
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let listeners = snapshot_listeners(&self.inner);
            rt.spawn(async move {
                for l in listeners {
                    l.on_connection_status_changed(ConnectionStatus::Disconnected)
                        .await;
                }
            });
        }
    }

    /// 加入会话房间
    pub fn join_conversation(&self, conversation_id: &str) {
        self.emit(ClientEvent::Join {
            conversation_id: conversation_id.to_string(),
        });
    }

    /// 发送消息
    pub fn send_message(&self, conversation_id: &str, content: &str) {
        self.emit(ClientEvent::Message {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
        });
    }

    /// 发送输入状态
    pub fn send_typing(&self, conversation_id: &str, is_typing: bool) {
        self.emit(ClientEvent::Typing {
            conversation_id: conversation_id.to_string(),
            is_typing,
        });
    }

    /// 通知服务器会话已读
    pub fn mark_read(&self, conversation_id: &str) {
        self.emit(ClientEvent::MarkRead {
            conversation_id: conversation_id.to_string(),
        });
    }

    fn emit(&self, event: ClientEvent) {
        let name = event.name();
        let guard = self.inner.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            debug!("[Socket] 未连接，丢弃事件: {}", name);
            return;
        };
        match serde_json::to_string(&event) {
            Ok(text) => {
                if tx.send(WsMessage::Text(text)).is_err() {
                    debug!("[Socket] 连接已关闭，丢弃事件: {}", name);
                } else {
                    debug!("[Socket] 📤 {}", name);
                }
            }
            Err(e) => error!("[Socket] 事件序列化失败: {}, {}", name, e),
        }
    }
}

fn snapshot_listeners(inner: &SocketInner) -> Vec<Arc<dyn ChatEventListener>> {
    inner.listeners.lock().values().cloned().collect()
}

fn is_current(inner: &SocketInner, generation: u64) -> bool {
    inner.generation.load(Ordering::SeqCst) == generation
}

async fn set_status(inner: &SocketInner, generation: u64, status: ConnectionStatus) {
    if !is_current(inner, generation) {
        return;
    }
    if inner.status.send_replace(status) == status {
        return;
    }
    for l in snapshot_listeners(inner) {
        l.on_connection_status_changed(status).await;
    }
}

async fn report_error(inner: &SocketInner, generation: u64, err: ChatError) {
    if !is_current(inner, generation) {
        return;
    }
    for l in snapshot_listeners(inner) {
        l.on_error(err.clone()).await;
    }
}

/// 连接管理循环：连接 → 会话 → 失败后有限次重连
async fn run_connection(inner: Arc<SocketInner>, token: String, generation: u64) {
    let max = inner.config.max_reconnect_attempts;
    let mut attempts: u32 = 0;

    loop {
        set_status(&inner, generation, ConnectionStatus::Connecting).await;

        match open_stream(&inner.config.ws_url, &token).await {
            Ok(stream) => {
                attempts = 0;
                let (tx, rx) = mpsc::unbounded_channel();
                {
                    let mut outbound = inner.outbound.lock();
                    if !is_current(&inner, generation) {
                        return;
                    }
                    *outbound = Some(tx);
                }
                info!("[Socket] ✅ WebSocket 连接成功");
                set_status(&inner, generation, ConnectionStatus::Connected).await;

                let result = run_session(&inner, stream, rx).await;
                if !is_current(&inner, generation) {
                    debug!("[Socket] 主动断开，会话结束");
                    return;
                }
                inner.outbound.lock().take();

                match result {
                    Ok(()) => warn!("[Socket] 连接被服务器关闭"),
                    Err(e) => {
                        error!("[Socket] ❌ 连接中断: {:#}", e);
                        report_error(&inner, generation, ChatError::Connection(format!("{:#}", e)))
                            .await;
                    }
                }
            }
            Err(e) => {
                error!("[Socket] ❌ 连接失败: {:#}", e);
                report_error(&inner, generation, ChatError::Connection(format!("{:#}", e))).await;
            }
        }

        if !is_current(&inner, generation) {
            return;
        }
        if attempts >= max {
            error!("[Socket] ❌ 重连 {} 次后放弃", attempts);
            set_status(&inner, generation, ConnectionStatus::Disconnected).await;
            report_error(&inner, generation, ChatError::ReconnectExhausted { attempts }).await;
            return;
        }
        attempts += 1;
        set_status(&inner, generation, ConnectionStatus::Disconnected).await;
        warn!(
            "[Socket] 🔄 {:?} 后第 {}/{} 次重连",
            inner.config.reconnect_delay, attempts, max
        );
        tokio::time::sleep(inner.config.reconnect_delay).await;
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn open_stream(ws_url: &str, token: &str) -> Result<WsStream> {
    let mut request = ws_url
        .into_client_request()
        .context("无效的 WebSocket URL")?;
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {}", token)).context("无效的 token")?,
    );
    let (stream, response) = connect_async(request).await.context("WebSocket 握手失败")?;
    debug!("[Socket] 握手响应状态: {}", response.status());
    Ok(stream)
}

/// 单次连接的读写循环；服务器正常关闭返回 Ok
async fn run_session(
    inner: &SocketInner,
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
) -> Result<()> {
    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            out = outbound.recv() => {
                let Some(msg) = out else { return Ok(()) };
                let closing = matches!(msg, WsMessage::Close(_));
                write.send(msg).await.context("发送失败")?;
                if closing {
                    return Ok(());
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => dispatch(inner, &text).await,
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("[Socket] 收到关闭帧: {:?}", frame);
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("读取失败"),
                None => return Ok(()),
            },
        }
    }
}

async fn dispatch(inner: &SocketInner, text: &str) {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(ev) => ev,
        Err(e) => {
            warn!("[Socket] ⚠️ 无法解析的事件，已忽略: {}, 原始数据: {}", e, text);
            return;
        }
    };

    let listeners = snapshot_listeners(inner);
    match event {
        ServerEvent::NewMessage(msg) => {
            debug!("[Socket] 📥 新消息: {} ({})", msg.id, msg.conversation_id);
            for l in listeners {
                l.on_new_message(msg.clone()).await;
            }
        }
        ServerEvent::Typing(signal) => {
            for l in listeners {
                l.on_typing(signal.clone()).await;
            }
        }
        ServerEvent::MessageRead(receipt) => {
            for l in listeners {
                l.on_message_read(receipt.clone()).await;
            }
        }
        ServerEvent::Error { message } => {
            warn!("[Socket] ⚠️ 服务器错误: {}", message);
            for l in listeners {
                l.on_error(ChatError::Server(message.clone())).await;
            }
        }
    }
}
