//! 测试辅助：日志、数据构造、内存版 REST 接口、本地 HTTP 应答器与 WebSocket 服务器

use crate::chat::api::{ChatApi, NotificationApi};
use crate::chat::types::{Conversation, Message, Notification, Participant, Role};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;

static INIT_LOGGER: Once = Once::new();

pub fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::new("info,ride_chat_sdk=debug,hyper_util::client=info,reqwest=info");

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

pub fn participant(id: &str, role: Role) -> Participant {
    Participant {
        id: id.to_string(),
        name: format!("user-{}", id),
        role,
        avatar: None,
    }
}

pub fn conversation(
    id: &str,
    a: Participant,
    b: Participant,
    unread: &[(&str, u32)],
) -> Conversation {
    Conversation {
        id: id.to_string(),
        participants: vec![a, b],
        last_message: None,
        last_message_at: None,
        unread_count: unread
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect(),
    }
}

pub fn message(id: &str, conversation_id: &str, sender_id: &str, content: &str) -> Message {
    Message {
        id: id.to_string(),
        sender: participant(sender_id, Role::Customer),
        conversation_id: conversation_id.to_string(),
        content: content.to_string(),
        created_at: Utc::now(),
        read: false,
    }
}

pub fn notification(id: &str, read: bool) -> Notification {
    Notification {
        id: id.to_string(),
        title: format!("title-{}", id),
        message: "document approved".to_string(),
        kind: "document".to_string(),
        read,
        created_at: Utc::now(),
    }
}

/// 内存版聊天接口，获取或创建会话按参与者对幂等
pub struct FakeChatApi {
    me: Participant,
    directory: HashMap<String, Participant>,
    pub conversations: Mutex<Vec<Conversation>>,
    pub history: Mutex<HashMap<String, Vec<Message>>>,
    pub created: AtomicUsize,
    pub mark_read_calls: Mutex<Vec<String>>,
    pub fail_requests: std::sync::atomic::AtomicBool,
    pub blank_ids: std::sync::atomic::AtomicBool,
    /// 历史快照取出后延迟返回，模拟慢请求
    pub history_delay: Mutex<Option<Duration>>,
}

impl FakeChatApi {
    pub fn new(me: Participant, others: Vec<Participant>) -> Self {
        Self {
            me,
            directory: others.into_iter().map(|p| (p.id.clone(), p)).collect(),
            conversations: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
            mark_read_calls: Mutex::new(Vec::new()),
            fail_requests: Default::default(),
            blank_ids: Default::default(),
            history_delay: Mutex::new(None),
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("HTTP 错误 500: down"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.check()?;
        let me = self.me.id.clone();
        Ok(self
            .conversations
            .lock()
            .iter()
            .filter(|c| c.participants.iter().any(|p| p.id == me))
            .cloned()
            .collect())
    }

    async fn admin_conversations(&self) -> Result<Vec<Conversation>> {
        self.check()?;
        Ok(self.conversations.lock().clone())
    }

    async fn open_conversation(&self, participant_id: &str) -> Result<Conversation> {
        self.check()?;
        let other = self
            .directory
            .get(participant_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("HTTP 错误 404: no such user"))?;
        let mut list = self.conversations.lock();
        let existing = list.iter().find(|c| {
            c.participants.iter().any(|p| p.id == self.me.id)
                && c.participants.iter().any(|p| p.id == participant_id)
        });
        if let Some(conv) = existing {
            return Ok(conv.clone());
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = if self.blank_ids.load(Ordering::SeqCst) {
            String::new()
        } else {
            format!("conv-{}", n)
        };
        let conv = conversation(&id, self.me.clone(), other, &[]);
        list.push(conv.clone());
        Ok(conv)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.check()?;
        let snapshot = self
            .history
            .lock()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        let delay = *self.history_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot)
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        self.check()?;
        self.mark_read_calls.lock().push(conversation_id.to_string());
        let me = self.me.id.clone();
        if let Some(conv) = self
            .conversations
            .lock()
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conv.unread_count.insert(me, 0);
        }
        Ok(())
    }
}

/// 内存版通知接口
#[derive(Default)]
pub struct FakeNotificationApi {
    pub items: Mutex<Vec<Notification>>,
    pub fail_requests: std::sync::atomic::AtomicBool,
}

impl FakeNotificationApi {
    pub fn with(items: Vec<Notification>) -> Self {
        Self {
            items: Mutex::new(items),
            fail_requests: Default::default(),
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("HTTP 错误 503: unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationApi for FakeNotificationApi {
    async fn unread_count(&self) -> Result<u32> {
        self.check()?;
        Ok(self.items.lock().iter().filter(|n| !n.read).count() as u32)
    }

    async fn list(&self) -> Result<Vec<Notification>> {
        self.check()?;
        Ok(self.items.lock().clone())
    }

    async fn mark_read(&self, notification_id: &str) -> Result<()> {
        self.check()?;
        if let Some(n) = self
            .items
            .lock()
            .iter_mut()
            .find(|n| n.id == notification_id)
        {
            n.read = true;
        }
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<()> {
        self.check()?;
        for n in self.items.lock().iter_mut() {
            n.read = true;
        }
        Ok(())
    }
}

/// 没有任何服务监听的 WebSocket 地址
pub async fn refused_ws_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("ws://127.0.0.1:{}", port)
}

/// 本地 WebSocket 服务器：记录握手头和客户端帧，可主动推送事件
pub struct TestServer {
    url: String,
    connections: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    last_auth: Arc<Mutex<Option<String>>>,
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<serde_json::Value>>,
    push_tx: broadcast::Sender<String>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let last_auth = Arc::new(Mutex::new(None));
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (push_tx, _) = broadcast::channel(64);

        let conns = connections.clone();
        let closed = closes.clone();
        let auth = last_auth.clone();
        let pushes = push_tx.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let conns = conns.clone();
                let closed = closed.clone();
                let auth = auth.clone();
                let frames_tx = frames_tx.clone();
                let mut push_rx = pushes.subscribe();
                tokio::spawn(async move {
                    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        let header = req
                            .headers()
                            .get("Authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(|s| s.to_string());
                        *auth.lock() = header;
                        conns.fetch_add(1, Ordering::SeqCst);
                        Ok(resp)
                    };
                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            incoming = read.next() => match incoming {
                                Some(Ok(WsMessage::Text(text))) => {
                                    if let Ok(v) = serde_json::from_str(&text) {
                                        let _ = frames_tx.send(v);
                                    }
                                }
                                Some(Ok(WsMessage::Close(_))) => {
                                    closed.fetch_add(1, Ordering::SeqCst);
                                    break;
                                }
                                None | Some(Err(_)) => break,
                                Some(Ok(_)) => {}
                            },
                            pushed = push_rx.recv() => match pushed {
                                Ok(text) => {
                                    if write.send(WsMessage::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            url,
            connections,
            closes,
            last_auth,
            frames: tokio::sync::Mutex::new(frames_rx),
            push_tx,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// 收到的客户端关闭帧数
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn last_auth(&self) -> Option<String> {
        self.last_auth.lock().clone()
    }

    pub fn push(&self, event: serde_json::Value) {
        let _ = self.push_tx.send(event.to_string());
    }

    /// 等待客户端发来的下一帧
    pub async fn next_frame(&self) -> serde_json::Value {
        let mut rx = self.frames.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("等待客户端帧超时")
            .expect("服务器已关闭")
    }

    /// 等待指定事件名的帧，跳过其他帧
    pub async fn next_event(&self, name: &str) -> serde_json::Value {
        loop {
            let frame = self.next_frame().await;
            if frame["event"] == name {
                return frame;
            }
        }
    }
}

/// HTTP 应答器记录下的一次请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// 头名统一小写
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// 本地 HTTP 应答器：按顺序返回预设的 (状态码, JSON) 响应并记录请求
pub struct HttpStub {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl HttpStub {
    pub async fn start(responses: Vec<(u16, serde_json::Value)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/api", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(Mutex::new(std::collections::VecDeque::from(responses)));

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut tcp, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    let Some(request) = read_http_request(&mut tcp).await else {
                        return;
                    };
                    recorded.lock().push(request);
                    let (status, body) = queue
                        .lock()
                        .pop_front()
                        .unwrap_or((404, serde_json::json!({"success": false, "message": "no stub"})));
                    let body = body.to_string();
                    let response = format!(
                        "HTTP/1.1 {} STUB\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = tcp.write_all(response.as_bytes()).await;
                    let _ = tcp.shutdown().await;
                });
            }
        });

        Self { base_url, requests }
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

async fn read_http_request(tcp: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = tcp.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = tcp.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = (header_end + length).min(buf.len());
    let body = String::from_utf8_lossy(&buf[header_end..end]).to_string();

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}
