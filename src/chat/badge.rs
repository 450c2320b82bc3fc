//! 未读角标
//!
//! 独立于聊天界面：定时拉取通知未读数（可选同时汇总聊天未读数），
//! 点开时全量拉取通知列表；已读操作先本地乐观更新再请求服务器。

use crate::chat::api::{ChatApi, NotificationApi};
use crate::chat::config::ChatConfig;
use crate::chat::error::ChatError;
use crate::chat::poll::{spawn_poller, PollHandle};
use crate::chat::types::Notification;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 角标文本：0 不显示，超过上限显示 "N+"
pub fn badge_label(count: u32, cap: u32) -> String {
    match count {
        0 => String::new(),
        n if n > cap => format!("{}+", cap),
        n => n.to_string(),
    }
}

/// 通知列表与未读计数
#[derive(Debug, Default)]
pub struct NotificationFeed {
    notifications: Vec<Notification>,
    unread: u32,
}

impl NotificationFeed {
    pub fn unread(&self) -> u32 {
        self.unread
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// 轮询得到的服务器计数
    pub fn set_unread(&mut self, count: u32) {
        self.unread = count;
    }

    /// 全量列表，未读数按列表重算
    pub fn replace(&mut self, notifications: Vec<Notification>) {
        self.unread = notifications.iter().filter(|n| !n.read).count() as u32;
        self.notifications = notifications;
    }

    /// 单条已读，状态变化时未读数减一（不低于 0）
    pub fn mark_read(&mut self, notification_id: &str) -> bool {
        let flipped = match self
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id)
        {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        };
        if flipped {
            self.unread = self.unread.saturating_sub(1);
        }
        flipped
    }

    pub fn mark_all_read(&mut self) {
        for n in self.notifications.iter_mut() {
            n.read = true;
        }
        self.unread = 0;
    }
}

#[derive(Default)]
struct BadgeState {
    feed: NotificationFeed,
    chat_unread: u32,
    last_error: Option<ChatError>,
}

/// 未读角标
pub struct UnreadBadge {
    user_id: String,
    cap: u32,
    poll_interval: std::time::Duration,
    notifications: Arc<dyn NotificationApi>,
    chat: Option<Arc<dyn ChatApi>>,
    state: Arc<Mutex<BadgeState>>,
    poller: Option<PollHandle>,
}

impl UnreadBadge {
    pub fn new(
        config: &ChatConfig,
        notifications: Arc<dyn NotificationApi>,
        chat: Option<Arc<dyn ChatApi>>,
    ) -> Self {
        Self {
            user_id: config.session.user_id().to_string(),
            cap: config.badge_cap,
            poll_interval: config.badge_poll_interval,
            notifications,
            chat,
            state: Arc::new(Mutex::new(BadgeState::default())),
            poller: None,
        }
    }

    pub fn notification_unread(&self) -> u32 {
        self.state.lock().feed.unread()
    }

    pub fn chat_unread(&self) -> u32 {
        self.state.lock().chat_unread
    }

    pub fn notification_label(&self) -> String {
        badge_label(self.notification_unread(), self.cap)
    }

    pub fn chat_label(&self) -> String {
        badge_label(self.chat_unread(), self.cap)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().feed.notifications().to_vec()
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.state.lock().last_error.clone()
    }

    /// 立即刷新一次并开始轮询
    pub async fn start(&mut self) {
        if self.poller.is_some() {
            return;
        }
        self.refresh().await;

        let notifications = self.notifications.clone();
        let chat = self.chat.clone();
        let state = self.state.clone();
        let user_id = self.user_id.clone();
        self.poller = Some(spawn_poller(
            "unread-badge",
            self.poll_interval,
            move || {
                let notifications = notifications.clone();
                let chat = chat.clone();
                let state = state.clone();
                let user_id = user_id.clone();
                async move {
                    refresh_counts(notifications.as_ref(), chat.as_deref(), &user_id, &state)
                        .await;
                }
            },
        ));
    }

    pub fn stop(&mut self) {
        self.poller = None;
    }

    pub async fn refresh(&self) {
        refresh_counts(
            self.notifications.as_ref(),
            self.chat.as_deref(),
            &self.user_id,
            &self.state,
        )
        .await;
    }

    /// 点开角标：全量拉取通知
    pub async fn open(&self) {
        info!("[Badge] 📋 拉取通知列表");
        match self.notifications.list().await {
            Ok(list) => self.state.lock().feed.replace(list),
            Err(e) => {
                warn!("[Badge] ❌ 拉取通知失败: {:#}", e);
                self.state.lock().last_error = Some(ChatError::request(&e));
            }
        }
    }

    /// 单条已读（乐观更新，失败不回滚）
    pub async fn mark_read(&self, notification_id: &str) {
        let changed = self.state.lock().feed.mark_read(notification_id);
        if !changed {
            debug!("[Badge] 通知已读或不存在: {}", notification_id);
            return;
        }
        if let Err(e) = self.notifications.mark_read(notification_id).await {
            warn!("[Badge] ⚠️ 标记通知已读失败: {:#}", e);
            self.state.lock().last_error = Some(ChatError::request(&e));
        }
    }

    /// 全部已读，服务器确认后再更新本地
    pub async fn mark_all_read(&self) {
        match self.notifications.mark_all_read().await {
            Ok(()) => {
                self.state.lock().feed.mark_all_read();
                info!("[Badge] ✅ 全部通知已读");
            }
            Err(e) => {
                warn!("[Badge] ❌ 全部已读失败: {:#}", e);
                self.state.lock().last_error = Some(ChatError::request(&e));
            }
        }
    }
}

async fn refresh_counts(
    notifications: &dyn NotificationApi,
    chat: Option<&dyn ChatApi>,
    user_id: &str,
    state: &Mutex<BadgeState>,
) {
    match notifications.unread_count().await {
        Ok(count) => state.lock().feed.set_unread(count),
        Err(e) => {
            warn!("[Badge] ❌ 获取通知未读数失败: {:#}", e);
            state.lock().last_error = Some(ChatError::request(&e));
        }
    }

    let Some(chat) = chat else { return };
    match chat.list_conversations().await {
        Ok(list) => {
            let total = list.iter().map(|c| c.unread_for(user_id)).sum();
            state.lock().chat_unread = total;
        }
        Err(e) => {
            warn!("[Badge] ❌ 获取聊天未读数失败: {:#}", e);
            state.lock().last_error = Some(ChatError::request(&e));
        }
    }
}
