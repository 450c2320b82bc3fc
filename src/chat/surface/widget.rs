//! 单会话悬浮聊天挂件（普通用户 / 司机）
//!
//! 打开时确保与指定对方只有一个会话，加载历史、加入房间并标记已读；
//! 只处理属于该会话的实时事件。关闭时释放订阅和定时器，但不断开共享连接。

use crate::chat::api::ChatApi;
use crate::chat::config::ChatConfig;
use crate::chat::error::ChatError;
use crate::chat::store::ConversationStore;
use crate::chat::transport::{ChatEventListener, ChatSocket, Subscription};
use crate::chat::typing::{TypingDebouncer, TypingIndicator};
use crate::chat::types::{Message, ReadReceipt, TypingSignal};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct WidgetState {
    store: ConversationStore,
    conversation_id: Option<String>,
    typing: TypingIndicator,
    composer: TypingDebouncer,
    loading: bool,
    last_error: Option<ChatError>,
}

/// 单会话聊天挂件
pub struct ChatWidget {
    config: ChatConfig,
    counterpart_id: String,
    api: Arc<dyn ChatApi>,
    socket: ChatSocket,
    state: Arc<Mutex<WidgetState>>,
    subscription: Option<Subscription>,
    typing_timer: Option<JoinHandle<()>>,
}

impl ChatWidget {
    pub fn new(
        config: ChatConfig,
        counterpart_id: impl Into<String>,
        api: Arc<dyn ChatApi>,
        socket: ChatSocket,
    ) -> Self {
        let state = WidgetState {
            store: ConversationStore::new(config.session.user_id()),
            conversation_id: None,
            typing: TypingIndicator::new(config.typing_timeout),
            composer: TypingDebouncer::new(config.typing_idle),
            loading: false,
            last_error: None,
        };
        Self {
            config,
            counterpart_id: counterpart_id.into(),
            api,
            socket,
            state: Arc::new(Mutex::new(state)),
            subscription: None,
            typing_timer: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.state.lock().conversation_id.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        let state = self.state.lock();
        match &state.conversation_id {
            Some(id) => state.store.messages(id).to_vec(),
            None => Vec::new(),
        }
    }

    pub fn unread(&self) -> u32 {
        self.state.lock().store.total_unread()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.state.lock().last_error.clone()
    }

    /// 对方是否正在输入
    pub fn counterpart_typing(&self) -> bool {
        self.state.lock().typing.active(Instant::now()).is_some()
    }

    /// 打开挂件
    ///
    /// 请求失败只记录错误，不向上传播
    pub async fn open(&mut self) {
        if self.is_open() {
            debug!("[Widget] 已打开，忽略");
            return;
        }
        {
            let mut state = self.state.lock();
            state.loading = true;
            state.last_error = None;
        }

        info!("[Widget] 💬 打开与 {} 的会话", self.counterpart_id);
        let conversation = match self.api.open_conversation(&self.counterpart_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!("[Widget] ❌ 获取会话失败: {:#}", e);
                self.fail(ChatError::request(&e));
                return;
            }
        };
        if conversation.id.trim().is_empty() {
            warn!("[Widget] ❌ 服务器返回的会话缺少 ID");
            self.fail(ChatError::MalformedPayload("会话 ID 缺失".to_string()));
            return;
        }
        let conversation_id = conversation.id.clone();

        {
            let mut state = self.state.lock();
            state.store.upsert_conversation(conversation);
            state.store.set_active(Some(conversation_id.clone()));
            state.conversation_id = Some(conversation_id.clone());
        }

        // 先订阅再拉历史，期间到达的消息靠去重合并
        self.subscription = Some(self.socket.subscribe(Arc::new(WidgetListener {
            conversation_id: conversation_id.clone(),
            self_id: self.config.session.user_id().to_string(),
            state: self.state.clone(),
        })));

        match self.api.messages(&conversation_id).await {
            Ok(history) => {
                self.state
                    .lock()
                    .store
                    .load_messages(&conversation_id, history);
            }
            Err(e) => {
                warn!("[Widget] ❌ 加载历史失败: {:#}", e);
                self.state.lock().last_error = Some(ChatError::request(&e));
            }
        }

        self.socket.join_conversation(&conversation_id);
        self.mark_read(&conversation_id).await;
        self.state.lock().loading = false;
        info!("[Widget] ✅ 会话已就绪: {}", conversation_id);
    }

    /// 关闭挂件，释放订阅和定时器
    pub async fn close(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        drop(subscription);
        self.stop_typing_timer();

        let conversation_id = {
            let mut state = self.state.lock();
            state.typing.clear();
            if state.composer.sent().is_some() {
                if let Some(id) = &state.conversation_id {
                    self.socket.send_typing(id, false);
                }
            }
            state.store.set_active(None);
            state.conversation_id.clone()
        };
        if self.config.mark_read_on_close {
            if let Some(id) = conversation_id {
                self.mark_read(&id).await;
            }
        }
        info!("[Widget] 👋 挂件已关闭");
    }

    /// 发送消息，空白内容忽略
    pub fn send_message(&mut self, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let Some(id) = self.conversation_id() else {
            warn!("[Widget] 会话未就绪，无法发送");
            return;
        };
        self.stop_typing_timer();
        if self.state.lock().composer.sent().is_some() {
            self.socket.send_typing(&id, false);
        }
        self.socket.send_message(&id, content);
    }

    /// 输入框按键
    pub fn on_input(&mut self) {
        let Some(id) = self.conversation_id() else {
            return;
        };
        let now = Instant::now();
        if self.state.lock().composer.keystroke(now) == Some(true) {
            self.socket.send_typing(&id, true);
        }

        self.stop_typing_timer();
        let state = self.state.clone();
        let socket = self.socket.clone();
        let idle = self.config.typing_idle;
        self.typing_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let stopped = state.lock().composer.poll(Instant::now());
            if stopped == Some(false) {
                socket.send_typing(&id, false);
            }
        }));
    }

    /// 单条消息进入视野：本地标记已读，未读数减一
    pub fn mark_message_read(&self, message_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(id) = state.conversation_id.clone() else {
            return false;
        };
        state.store.mark_message_read(&id, message_id)
    }

    async fn mark_read(&self, conversation_id: &str) {
        self.state.lock().store.mark_conversation_read(conversation_id);
        self.socket.mark_read(conversation_id);
        // 失败时不回滚，下一次刷新以服务器为准
        if let Err(e) = self.api.mark_read(conversation_id).await {
            warn!("[Widget] ⚠️ 标记已读失败: {:#}", e);
            self.state.lock().last_error = Some(ChatError::request(&e));
        }
    }

    fn fail(&self, err: ChatError) {
        let mut state = self.state.lock();
        state.loading = false;
        state.last_error = Some(err);
    }

    fn stop_typing_timer(&mut self) {
        if let Some(handle) = self.typing_timer.take() {
            handle.abort();
        }
    }
}

impl Drop for ChatWidget {
    fn drop(&mut self) {
        self.stop_typing_timer();
    }
}

struct WidgetListener {
    conversation_id: String,
    self_id: String,
    state: Arc<Mutex<WidgetState>>,
}

#[async_trait]
impl ChatEventListener for WidgetListener {
    async fn on_new_message(&self, message: Message) {
        if message.conversation_id != self.conversation_id {
            return;
        }
        let mut state = self.state.lock();
        if message.sender.id != self.self_id {
            state.typing.clear();
        }
        state.store.ingest_message(message);
    }

    async fn on_typing(&self, signal: TypingSignal) {
        if signal.conversation_id != self.conversation_id || signal.user_id == self.self_id {
            return;
        }
        self.state.lock().typing.apply(signal, Instant::now());
    }

    async fn on_message_read(&self, receipt: ReadReceipt) {
        if receipt.conversation_id != self.conversation_id {
            return;
        }
        self.state.lock().store.apply_read_receipt(&receipt);
    }

    async fn on_error(&self, error: ChatError) {
        warn!("[Widget] ⚠️ {}", error);
        self.state.lock().last_error = Some(error);
    }
}
