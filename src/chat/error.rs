//! 聊天错误分类
//!
//! 交给监听器或作为界面提示保存的错误值；内部函数仍返回 `anyhow::Result`

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// 单次连接失败或连接意外断开，会触发有限次数的自动重连
    #[error("连接错误: {0}")]
    Connection(String),

    /// 自动重连次数已用尽，连接停止
    #[error("重连失败，已尝试 {attempts} 次")]
    ReconnectExhausted { attempts: u32 },

    /// 服务器通过 `chat:error` 推送的错误
    #[error("服务器错误: {0}")]
    Server(String),

    /// REST 请求失败
    #[error("请求失败: {0}")]
    Request(String),

    /// 服务器返回的数据缺少必要字段
    #[error("数据无效: {0}")]
    MalformedPayload(String),
}

impl ChatError {
    pub fn request(err: &anyhow::Error) -> Self {
        ChatError::Request(format!("{:#}", err))
    }
}
