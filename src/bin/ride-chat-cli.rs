//! 网约车聊天 CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示聊天功能
//! 指定对方 ID 时以悬浮挂件模式运行，否则以管理员收件箱模式运行

use anyhow::{Context, Result};
use clap::Parser;
use ride_chat_sdk::chat::{
    build_http_client, ChatApi, HttpChatApi, HttpNotificationApi, NotificationApi, SocketConfig,
};
use ride_chat_sdk::chat::types::{Message, ReadReceipt, TypingSignal};
use ride_chat_sdk::{
    AdminInbox, ChatConfig, ChatError, ChatEventListener, ChatSocket, ChatWidget,
    ConnectionStatus, Participant, Role, SessionContext, UnreadBadge,
};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{error, info, warn};

/// 网约车聊天 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "ride-chat-cli")]
#[command(about = "网约车聊天 CLI 客户端 - 用于测试和展示聊天功能", long_about = None)]
struct Args {
    /// WebSocket 服务器地址
    #[arg(long, default_value = "ws://localhost:5000/chat")]
    ws_url: String,

    /// REST API 基础地址
    #[arg(long, default_value = "http://localhost:5000/api")]
    api_url: String,

    /// 登录 token
    #[arg(short, long)]
    token: String,

    /// 当前用户 ID
    #[arg(short, long)]
    user_id: String,

    /// 当前用户名
    #[arg(long, default_value = "cli")]
    user_name: String,

    /// 当前用户角色（admin / driver / customer）
    #[arg(short, long, default_value = "customer")]
    role: String,

    /// 对方用户 ID，指定时打开单会话挂件
    #[arg(short, long)]
    counterpart: Option<String>,

    /// 会话打开后发送的一条消息
    #[arg(short, long)]
    message: Option<String>,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,ride_chat_sdk=debug）
    #[arg(long, default_value = "info,ride_chat_sdk=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .context("无法创建日志文件 debug.log")?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
    Ok(())
}

/// 输出所有接收到的 Socket 事件
struct CliListener;

#[async_trait::async_trait]
impl ChatEventListener for CliListener {
    async fn on_new_message(&self, message: Message) {
        info!(
            "[CLI/Message] 📨 {} | {}: {}",
            message.conversation_id, message.sender.name, message.content
        );
    }

    async fn on_typing(&self, signal: TypingSignal) {
        info!(
            "[CLI/Message] ⌨️ {} 输入状态: {}",
            signal.user_id, signal.is_typing
        );
    }

    async fn on_message_read(&self, receipt: ReadReceipt) {
        info!(
            "[CLI/Message] 📖 {} 已读会话 {}",
            receipt.user_id, receipt.conversation_id
        );
    }

    async fn on_error(&self, error: ChatError) {
        error!("[CLI/Socket] ❌ {}", error);
    }

    async fn on_connection_status_changed(&self, status: ConnectionStatus) {
        info!("[CLI/Socket] 🔗 连接状态: {:?}", status);
    }
}

/// 两种运行模式
enum Surface {
    Widget(ChatWidget),
    Inbox(AdminInbox),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level)?;

    info!("[CLI] 🚀 网约车聊天 CLI 客户端（测试模式）");
    info!("[CLI] 👤 用户: {} ({})", args.user_id, args.role);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let user = Participant {
        id: args.user_id.clone(),
        name: args.user_name.clone(),
        role: Role::from(args.role.clone()),
        avatar: None,
    };
    let session = SessionContext::new(user, args.token.clone());
    let config = ChatConfig::new(session)
        .with_ws_url(args.ws_url.clone())
        .with_api_base_url(args.api_url.clone());

    let http = build_http_client(&config.session.token)?;
    let chat_api: Arc<dyn ChatApi> =
        Arc::new(HttpChatApi::new(http.clone(), config.api_base_url.clone()));
    let notification_api: Arc<dyn NotificationApi> =
        Arc::new(HttpNotificationApi::new(http, config.api_base_url.clone()));

    let socket = ChatSocket::new(SocketConfig::from(&config));
    let _cli_subscription = socket.subscribe(Arc::new(CliListener));

    let mut badge = UnreadBadge::new(&config, notification_api, Some(chat_api.clone()));
    badge.start().await;
    info!(
        "[CLI] 🔔 通知未读: {:?} | 💬 聊天未读: {:?}",
        badge.notification_label(),
        badge.chat_label()
    );

    let mut surface = match &args.counterpart {
        Some(counterpart) => {
            info!("[CLI] 🔗 正在连接服务器...");
            socket.connect(&config.session.token);
            if timeout(
                Duration::from_secs(10),
                socket.wait_for_status(ConnectionStatus::Connected),
            )
            .await
            .is_err()
            {
                warn!("[CLI] ⚠️ 10 秒内未连接成功，继续以离线模式打开会话");
            }

            let mut widget = ChatWidget::new(
                config.clone(),
                counterpart.clone(),
                chat_api.clone(),
                socket.clone(),
            );
            widget.open().await;
            if let Some(e) = widget.last_error() {
                error!("[CLI] ❌ 打开会话失败: {}", e);
            }
            info!(
                "[CLI] 📋 会话 {:?}，历史消息 {} 条",
                widget.conversation_id(),
                widget.messages().len()
            );
            if let Some(content) = &args.message {
                widget.send_message(content);
            }
            Surface::Widget(widget)
        }
        None => {
            if !config.session.is_admin() {
                warn!("[CLI] ⚠️ 当前用户不是管理员，管理员接口可能被拒绝");
            }
            let mut inbox = AdminInbox::new(config.clone(), chat_api.clone(), socket.clone());
            inbox.mount().await;
            let conversations = inbox.conversations();
            info!("[CLI] 📋 会话列表（共 {} 个）:", conversations.len());
            for conv in conversations.iter().take(5) {
                let preview = conv.last_message.as_deref().unwrap_or("");
                info!(
                    "[CLI]   - {} | 未读: {} | 最新: {}",
                    conv.id,
                    conv.unread_for(config.session.user_id()),
                    preview.chars().take(30).collect::<String>()
                );
            }
            info!("[CLI] 📬 总未读数: {}", inbox.total_unread());
            Surface::Inbox(inbox)
        }
    };

    info!("[CLI] 📥 开始监听消息...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        tokio::signal::ctrl_c().await?;
    }

    match &mut surface {
        Surface::Widget(widget) => widget.close().await,
        Surface::Inbox(inbox) => inbox.unmount(),
    }
    badge.stop();
    socket.disconnect();
    info!("[CLI] 👋 程序退出");

    Ok(())
}
