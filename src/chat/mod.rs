pub mod api;
pub mod badge;
pub mod config;
pub mod error;
pub mod poll;
pub mod store;
pub mod surface;
pub mod transport;
pub mod types;
pub mod typing;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{build_http_client, ChatApi, HttpChatApi, HttpNotificationApi, NotificationApi};
pub use badge::{badge_label, NotificationFeed, UnreadBadge};
pub use config::{ChatConfig, SessionContext};
pub use error::ChatError;
pub use store::{ConversationStore, RoleFilter};
pub use surface::{AdminInbox, ChatWidget};
pub use transport::{ChatEventListener, ChatSocket, ConnectionStatus, SocketConfig, Subscription};
