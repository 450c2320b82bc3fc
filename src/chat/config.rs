//! 会话上下文与客户端配置

use crate::chat::types::{Participant, Role};
use std::time::Duration;

/// 当前登录会话：用户身份与 bearer token
///
/// 由调用方显式传入各组件，组件内部不做全局查找
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub user: Participant,
    pub token: String,
}

impl SessionContext {
    pub fn new(user: Participant, token: String) -> Self {
        Self { user, token }
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }
}

/// 聊天客户端配置
#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub session: SessionContext,
    /// WebSocket 服务器 URL
    pub ws_url: String,
    /// REST API 基础地址
    pub api_base_url: String,
    /// 最大自动重连次数
    pub max_reconnect_attempts: u32,
    /// 两次重连之间的固定间隔
    pub reconnect_delay: Duration,
    /// 对方输入提示在无新信号时的保留时长
    pub typing_timeout: Duration,
    /// 本地停止输入多久后发送 typing=false
    pub typing_idle: Duration,
    /// 管理员收件箱轮询间隔
    pub inbox_poll_interval: Duration,
    /// 未读角标轮询间隔
    pub badge_poll_interval: Duration,
    /// 角标显示上限，超过显示 "N+"
    pub badge_cap: u32,
    /// 关闭挂件时是否再次标记已读
    pub mark_read_on_close: bool,
}

impl ChatConfig {
    /// 创建默认配置
    pub fn new(session: SessionContext) -> Self {
        Self {
            session,
            ws_url: "ws://localhost:5000/chat".to_string(),
            api_base_url: "http://localhost:5000/api".to_string(),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            typing_timeout: Duration::from_millis(1000),
            typing_idle: Duration::from_millis(1000),
            inbox_poll_interval: Duration::from_secs(10),
            badge_poll_interval: Duration::from_secs(30),
            badge_cap: 9,
            mark_read_on_close: true,
        }
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    pub fn with_api_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = api_base_url.into();
        self
    }

    pub fn with_reconnect(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_delay = delay;
        self
    }
}
