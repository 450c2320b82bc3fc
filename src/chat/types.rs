use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Socket 事件名
pub mod event {
    pub const JOIN: &str = "chat:join";
    pub const MESSAGE: &str = "chat:message";
    pub const TYPING: &str = "chat:typing";
    pub const MESSAGE_READ: &str = "chat:message:read";
    pub const MESSAGE_NEW: &str = "chat:message:new";
    pub const ERROR: &str = "chat:error";
}

/// 参与者角色
///
/// 服务器返回的未知角色原样保留在 `Other` 中
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Driver,
    Customer,
    Other(String),
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "driver" => Role::Driver,
            "customer" | "user" => Role::Customer,
            _ => Role::Other(value),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Driver => "driver",
            Role::Customer => "customer",
            Role::Other(s) => s,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会话参与者 / 消息发送者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// 会话
///
/// `unread_count` 按参与者 ID 记录未读数，服务器缺省时为空表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: HashMap<String, u32>,
}

impl Conversation {
    /// 会话中除 `self_id` 以外的第一个参与者
    pub fn counterpart(&self, self_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id != self_id)
    }

    pub fn unread_for(&self, user_id: &str) -> u32 {
        self.unread_count.get(user_id).copied().unwrap_or(0)
    }
}

/// 聊天消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: String,
    pub sender: Participant,
    #[serde(alias = "conversation")]
    pub conversation_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// 标记为已读，返回状态是否发生变化（已读不可回退）
    pub fn mark_read(&mut self) -> bool {
        if self.read {
            return false;
        }
        self.read = true;
        true
    }
}

/// 输入提示信号（不持久化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub conversation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

/// 已读回执：`user_id` 已读完会话中所有非自己发送的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: String,
    pub user_id: String,
}

/// 通知中心条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "type")]
    pub kind: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// 客户端发出的 Socket 事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "chat:join", rename_all = "camelCase")]
    Join { conversation_id: String },
    #[serde(rename = "chat:message", rename_all = "camelCase")]
    Message {
        conversation_id: String,
        content: String,
    },
    #[serde(rename = "chat:typing", rename_all = "camelCase")]
    Typing {
        conversation_id: String,
        is_typing: bool,
    },
    #[serde(rename = "chat:message:read", rename_all = "camelCase")]
    MarkRead { conversation_id: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => event::JOIN,
            ClientEvent::Message { .. } => event::MESSAGE,
            ClientEvent::Typing { .. } => event::TYPING,
            ClientEvent::MarkRead { .. } => event::MESSAGE_READ,
        }
    }
}

/// 服务器推送的 Socket 事件
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "chat:message:new")]
    NewMessage(Message),
    #[serde(rename = "chat:typing")]
    Typing(TypingSignal),
    #[serde(rename = "chat:message:read")]
    MessageRead(ReadReceipt),
    #[serde(rename = "chat:error")]
    Error { message: String },
}

/// REST 统一响应包装
/// data 字段可能为 null 或缺失
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

fn default_success() -> bool {
    true
}

/// 通用 HTTP 响应处理：检查 HTTP 状态与 `success` 标志后反序列化
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<ApiResponse<T>> {
    use anyhow::Context;
    use tracing::{debug, error};

    let status = response.status();
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }

    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })?;

    if !api_resp.success {
        let msg = api_resp.message.clone().unwrap_or_else(|| "未知错误".to_string());
        error!("[HTTP] {}服务器返回失败: {}", operation_name, msg);
        return Err(anyhow::anyhow!("服务器错误: {}", msg));
    }

    Ok(api_resp)
}
