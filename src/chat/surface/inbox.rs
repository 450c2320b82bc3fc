//! 管理员多会话收件箱
//!
//! 挂载时建立连接、加载全部会话并启动轮询；选中会话时加载消息、加入房间、标记已读。
//! 非选中会话的新消息只更新预览和未读数。卸载时断开连接（收件箱是连接的唯一持有者）。

use crate::chat::api::ChatApi;
use crate::chat::config::ChatConfig;
use crate::chat::error::ChatError;
use crate::chat::poll::{spawn_poller, PollHandle};
use crate::chat::store::{ConversationStore, RoleFilter};
use crate::chat::transport::{ChatEventListener, ChatSocket, Subscription};
use crate::chat::typing::{TypingDebouncer, TypingIndicator};
use crate::chat::types::{Conversation, Message, ReadReceipt, TypingSignal};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct InboxState {
    store: ConversationStore,
    filter: RoleFilter,
    typing: TypingIndicator,
    composer: TypingDebouncer,
    loading: bool,
    last_error: Option<ChatError>,
}

/// 管理员收件箱
pub struct AdminInbox {
    config: ChatConfig,
    api: Arc<dyn ChatApi>,
    socket: ChatSocket,
    state: Arc<Mutex<InboxState>>,
    subscription: Option<Subscription>,
    poller: Option<PollHandle>,
    typing_timer: Option<JoinHandle<()>>,
}

impl AdminInbox {
    pub fn new(config: ChatConfig, api: Arc<dyn ChatApi>, socket: ChatSocket) -> Self {
        let state = InboxState {
            store: ConversationStore::new(config.session.user_id()),
            filter: RoleFilter::All,
            typing: TypingIndicator::new(config.typing_timeout),
            composer: TypingDebouncer::new(config.typing_idle),
            loading: false,
            last_error: None,
        };
        Self {
            config,
            api,
            socket,
            state: Arc::new(Mutex::new(state)),
            subscription: None,
            poller: None,
            typing_timer: None,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    /// 当前过滤条件下的会话
    pub fn conversations(&self) -> Vec<Conversation> {
        let state = self.state.lock();
        state
            .store
            .filtered(&state.filter)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.state.lock().store.conversation(conversation_id).cloned()
    }

    pub fn set_filter(&self, filter: RoleFilter) {
        debug!("[Inbox] 过滤条件: {:?}", filter);
        self.state.lock().filter = filter;
    }

    pub fn selected(&self) -> Option<String> {
        self.state.lock().store.active().map(|s| s.to_string())
    }

    /// 当前选中会话的消息
    pub fn messages(&self) -> Vec<Message> {
        let state = self.state.lock();
        match state.store.active() {
            Some(id) => state.store.messages(id).to_vec(),
            None => Vec::new(),
        }
    }

    pub fn total_unread(&self) -> u32 {
        self.state.lock().store.total_unread()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.state.lock().last_error.clone()
    }

    /// 选中会话中正在输入的用户
    pub fn typing_user(&self) -> Option<String> {
        self.state
            .lock()
            .typing
            .active(Instant::now())
            .map(|s| s.to_string())
    }

    /// 挂载：连接、订阅、首次加载并启动轮询
    pub async fn mount(&mut self) {
        if self.is_mounted() {
            return;
        }
        info!("[Inbox] 📥 挂载管理员收件箱");
        self.socket.connect(&self.config.session.token);
        self.subscription = Some(self.socket.subscribe(Arc::new(InboxListener {
            self_id: self.config.session.user_id().to_string(),
            state: self.state.clone(),
        })));

        self.state.lock().loading = true;
        self.refresh().await;
        self.state.lock().loading = false;

        let api = self.api.clone();
        let state = self.state.clone();
        self.poller = Some(spawn_poller(
            "admin-inbox",
            self.config.inbox_poll_interval,
            move || {
                let api = api.clone();
                let state = state.clone();
                async move {
                    refresh_into(api.as_ref(), &state).await;
                }
            },
        ));
    }

    /// 从服务器刷新会话列表
    pub async fn refresh(&self) {
        refresh_into(self.api.as_ref(), &self.state).await;
    }

    /// 选中会话
    pub async fn select(&mut self, conversation_id: &str) {
        if conversation_id.trim().is_empty() {
            warn!("[Inbox] ❌ 会话 ID 为空，忽略选择");
            return;
        }
        info!("[Inbox] 👉 选中会话: {}", conversation_id);
        self.finish_typing();
        {
            let mut state = self.state.lock();
            state.store.set_active(Some(conversation_id.to_string()));
            state.typing.clear();
        }

        match self.api.messages(conversation_id).await {
            Ok(history) => self
                .state
                .lock()
                .store
                .load_messages(conversation_id, history),
            Err(e) => {
                warn!("[Inbox] ❌ 加载消息失败: {:#}", e);
                self.state.lock().last_error = Some(ChatError::request(&e));
            }
        }

        self.socket.join_conversation(conversation_id);
        self.state
            .lock()
            .store
            .mark_conversation_read(conversation_id);
        self.socket.mark_read(conversation_id);
        if let Err(e) = self.api.mark_read(conversation_id).await {
            // 不回滚，等待下一次刷新
            warn!("[Inbox] ⚠️ 标记已读失败: {:#}", e);
            self.state.lock().last_error = Some(ChatError::request(&e));
        }
        self.refresh().await;
    }

    /// 向选中会话发送消息，空白内容忽略
    pub fn send_message(&mut self, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let Some(id) = self.selected() else {
            warn!("[Inbox] 未选中会话，无法发送");
            return;
        };
        self.finish_typing();
        self.socket.send_message(&id, content);
    }

    /// 输入框按键
    pub fn on_input(&mut self) {
        let Some(id) = self.selected() else {
            return;
        };
        if self.state.lock().composer.keystroke(Instant::now()) == Some(true) {
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
        let Some(id) = state.store.active().map(|s| s.to_string()) else {
            return false;
        };
        state.store.mark_message_read(&id, message_id)
    }

    /// 结束当前输入状态，之前发送过 typing=true 时补发 typing=false
    fn finish_typing(&mut self) {
        self.stop_typing_timer();
        let mut state = self.state.lock();
        if state.composer.sent().is_some() {
            if let Some(id) = state.store.active() {
                self.socket.send_typing(id, false);
            }
        }
    }

    fn stop_typing_timer(&mut self) {
        if let Some(handle) = self.typing_timer.take() {
            handle.abort();
        }
    }

    /// 卸载：取消订阅、停止轮询并断开连接
    pub fn unmount(&mut self) {
        if self.subscription.take().is_none() {
            return;
        }
        self.finish_typing();
        self.poller = None;
        self.socket.disconnect();
        self.state.lock().store.clear();
        info!("[Inbox] 👋 收件箱已卸载");
    }
}

impl Drop for AdminInbox {
    fn drop(&mut self) {
        self.unmount();
        self.stop_typing_timer();
    }
}

async fn refresh_into(api: &dyn ChatApi, state: &Mutex<InboxState>) {
    match api.admin_conversations().await {
        Ok(list) => {
            let mut state = state.lock();
            state.store.replace_conversations(list);
            state.last_error = None;
        }
        Err(e) => {
            warn!("[Inbox] ❌ 刷新会话列表失败: {:#}", e);
            state.lock().last_error = Some(ChatError::request(&e));
        }
    }
}

struct InboxListener {
    self_id: String,
    state: Arc<Mutex<InboxState>>,
}

#[async_trait]
impl ChatEventListener for InboxListener {
    async fn on_new_message(&self, message: Message) {
        let mut state = self.state.lock();
        if state.store.active() == Some(message.conversation_id.as_str())
            && message.sender.id != self.self_id
        {
            state.typing.clear();
        }
        state.store.ingest_message(message);
    }

    async fn on_typing(&self, signal: TypingSignal) {
        if signal.user_id == self.self_id {
            return;
        }
        let mut state = self.state.lock();
        if state.store.active() == Some(signal.conversation_id.as_str()) {
            state.typing.apply(signal, Instant::now());
        }
    }

    async fn on_message_read(&self, receipt: ReadReceipt) {
        self.state.lock().store.apply_read_receipt(&receipt);
    }

    async fn on_error(&self, error: ChatError) {
        warn!("[Inbox] ⚠️ {}", error);
        self.state.lock().last_error = Some(error);
    }
}
