pub mod chat;

// 重新导出常用类型，方便外部使用
pub use chat::{
    types::{Conversation, Message, Notification, Participant, Role},
    AdminInbox, ChatConfig, ChatError, ChatEventListener, ChatSocket, ChatWidget,
    ConnectionStatus, ConversationStore, SessionContext, UnreadBadge,
};
