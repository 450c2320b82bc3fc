//! 聊天界面组件：单会话挂件与管理员收件箱

pub mod inbox;
pub mod widget;

pub use inbox::AdminInbox;
pub use widget::ChatWidget;
