//! 会话存储
//!
//! 保存当前会话期内的会话列表、各会话消息和总未读数，
//! 负责把 REST 快照与 Socket 推送的增量合并成一致视图。
//! 所有方法都是同步的，由上层界面在锁内调用。

use crate::chat::types::{Conversation, Message, ReadReceipt, Role};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// 按对方角色过滤会话
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoleFilter {
    #[default]
    All,
    Role(Role),
}

impl RoleFilter {
    pub fn matches(&self, conversation: &Conversation, self_id: &str) -> bool {
        match self {
            RoleFilter::All => true,
            RoleFilter::Role(role) => conversation
                .counterpart(self_id)
                .map(|p| &p.role == role)
                .unwrap_or(false),
        }
    }
}

/// 会话存储
#[derive(Debug)]
pub struct ConversationStore {
    user_id: String,
    conversations: Vec<Conversation>,
    /// 历史消息与 Socket 推送的合并结果，未加载历史时只含推送
    messages: HashMap<String, Vec<Message>>,
    unread_total: u32,
    active: Option<String>,
}

impl ConversationStore {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversations: Vec::new(),
            messages: HashMap::new(),
            unread_total: 0,
            active: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    /// 按对方角色过滤后的会话列表
    pub fn filtered(&self, filter: &RoleFilter) -> Vec<&Conversation> {
        self.conversations
            .iter()
            .filter(|c| filter.matches(c, &self.user_id))
            .collect()
    }

    /// 会话已知的消息
    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.messages
            .get(conversation_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn total_unread(&self) -> u32 {
        self.unread_total
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// 设置当前正在查看的会话，该会话的新消息不计入未读
    pub fn set_active(&mut self, conversation_id: Option<String>) {
        self.active = conversation_id;
    }

    /// 用服务器快照替换会话列表
    ///
    /// 重复 ID 只保留首个；总未读数按快照重算，本地乐观状态被覆盖
    pub fn replace_conversations(&mut self, snapshot: Vec<Conversation>) {
        let mut seen = HashSet::new();
        let before = snapshot.len();
        self.conversations = snapshot
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();
        if self.conversations.len() != before {
            warn!(
                "[Store] ⚠️ 会话快照中存在重复条目，已去重: {} -> {}",
                before,
                self.conversations.len()
            );
        }
        self.recompute_unread();
        debug!(
            "[Store] 会话列表已刷新，会话数: {}, 总未读: {}",
            self.conversations.len(),
            self.unread_total
        );
    }

    /// 插入或替换单个会话（获取或创建会话的结果）
    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        match self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            Some(existing) => *existing = conversation,
            None => self.conversations.push(conversation),
        }
        self.recompute_unread();
    }

    /// 合并 REST 拉取的历史与已通过 Socket 收到的消息
    ///
    /// 同 ID 以快照内容为准，但已读标记只进不退；结果按创建时间稳定排序
    pub fn load_messages(&mut self, conversation_id: &str, history: Vec<Message>) {
        let mut local: HashMap<String, Message> = self
            .messages
            .remove(conversation_id)
            .unwrap_or_default()
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(history.len() + local.len());
        for mut m in history {
            if !seen.insert(m.id.clone()) {
                continue;
            }
            if let Some(known) = local.remove(&m.id) {
                m.read |= known.read;
            }
            merged.push(m);
        }
        merged.extend(local.into_values());
        merged.sort_by_key(|m| m.created_at);
        debug!(
            "[Store] 会话 {} 历史已合并，消息数: {}",
            conversation_id,
            merged.len()
        );
        self.messages.insert(conversation_id.to_string(), merged);
    }

    /// 处理一条新消息，返回是否为新消息
    ///
    /// ID 已存在时不做任何修改。未加载历史的会话先缓存推送，加载历史时再合并。
    pub fn ingest_message(&mut self, message: Message) -> bool {
        let duplicate = self
            .messages
            .get(&message.conversation_id)
            .map(|list| list.iter().any(|m| m.id == message.id))
            .unwrap_or(false);
        if duplicate {
            debug!("[Store] 重复消息，忽略: {}", message.id);
            return false;
        }

        let counts_unread = message.sender.id != self.user_id
            && self.active.as_deref() != Some(message.conversation_id.as_str());

        match self
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            Some(conv) => {
                let newer = conv
                    .last_message_at
                    .map(|t| t <= message.created_at)
                    .unwrap_or(true);
                if newer {
                    conv.last_message = Some(message.content.clone());
                    conv.last_message_at = Some(message.created_at);
                }
                if counts_unread {
                    *conv.unread_count.entry(self.user_id.clone()).or_insert(0) += 1;
                    self.unread_total += 1;
                }
            }
            None => {
                info!(
                    "[Store] 收到未知会话的消息，等待下次刷新: {}",
                    message.conversation_id
                );
            }
        }

        self.messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
        true
    }

    /// 乐观地把当前用户在该会话的未读数清零，返回清零前的值
    pub fn mark_conversation_read(&mut self, conversation_id: &str) -> u32 {
        let user_id = self.user_id.clone();
        let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        else {
            return 0;
        };
        let previous = conv.unread_count.insert(user_id.clone(), 0).unwrap_or(0);
        self.unread_total = self.unread_total.saturating_sub(previous);

        if let Some(list) = self.messages.get_mut(conversation_id) {
            for m in list.iter_mut().filter(|m| m.sender.id != user_id) {
                m.mark_read();
            }
        }
        previous
    }

    /// 标记单条消息已读，未读数减一（不低于 0）
    pub fn mark_message_read(&mut self, conversation_id: &str, message_id: &str) -> bool {
        let flipped = self
            .messages
            .get_mut(conversation_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message_id))
            .map(|m| m.mark_read())
            .unwrap_or(false);
        if !flipped {
            return false;
        }

        if let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            if let Some(n) = conv.unread_count.get_mut(&self.user_id) {
                if *n > 0 {
                    *n -= 1;
                    self.unread_total = self.unread_total.saturating_sub(1);
                }
            }
        }
        true
    }

    /// 对方已读回执：该会话中所有非回执方发送的消息置为已读
    pub fn apply_read_receipt(&mut self, receipt: &ReadReceipt) -> usize {
        let Some(list) = self.messages.get_mut(&receipt.conversation_id) else {
            return 0;
        };
        let flipped = list
            .iter_mut()
            .filter(|m| m.sender.id != receipt.user_id)
            .map(|m| m.mark_read())
            .filter(|changed| *changed)
            .count();
        if receipt.user_id == self.user_id {
            if let Some(conv) = self
                .conversations
                .iter_mut()
                .find(|c| c.id == receipt.conversation_id)
            {
                let previous = conv.unread_count.insert(self.user_id.clone(), 0).unwrap_or(0);
                self.unread_total = self.unread_total.saturating_sub(previous);
            }
        }
        flipped
    }

    /// 登出或断开时丢弃所有数据
    pub fn clear(&mut self) {
        self.conversations.clear();
        self.messages.clear();
        self.unread_total = 0;
        self.active = None;
    }

    fn recompute_unread(&mut self) {
        self.unread_total = self
            .conversations
            .iter()
            .map(|c| c.unread_for(&self.user_id))
            .sum();
    }
}
