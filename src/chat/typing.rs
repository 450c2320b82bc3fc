//! 输入提示
//!
//! `TypingIndicator` 展示对方最近一次输入信号，超时自动消失；
//! `TypingDebouncer` 把本地按键折叠成 typing=true / typing=false 两个边沿。
//! 两者都以显式传入的时间点计算，定时器由上层界面负责。

use crate::chat::types::TypingSignal;
use std::time::Duration;
use tokio::time::Instant;

/// 对方输入状态
#[derive(Debug)]
pub struct TypingIndicator {
    window: Duration,
    current: Option<(TypingSignal, Instant)>,
}

impl TypingIndicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            current: None,
        }
    }

    /// 记录一条信号，新信号总是覆盖旧信号
    pub fn apply(&mut self, signal: TypingSignal, now: Instant) {
        if signal.is_typing {
            self.current = Some((signal, now));
        } else {
            self.current = None;
        }
    }

    /// 当前正在输入的用户 ID，超过窗口期未收到新信号则为 None
    pub fn active(&self, now: Instant) -> Option<&str> {
        match &self.current {
            Some((signal, at)) if now.saturating_duration_since(*at) < self.window => {
                Some(signal.user_id.as_str())
            }
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

/// 本地输入防抖
#[derive(Debug)]
pub struct TypingDebouncer {
    idle: Duration,
    last_keystroke: Option<Instant>,
}

impl TypingDebouncer {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            last_keystroke: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.last_keystroke.is_some()
    }

    /// 按键；空闲后的第一次按键返回 `Some(true)`
    pub fn keystroke(&mut self, now: Instant) -> Option<bool> {
        let started = self.last_keystroke.is_none();
        self.last_keystroke = Some(now);
        started.then_some(true)
    }

    /// 空闲期已过则返回 `Some(false)`
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        match self.last_keystroke {
            Some(at) if now.saturating_duration_since(at) >= self.idle => {
                self.last_keystroke = None;
                Some(false)
            }
            _ => None,
        }
    }

    /// 发送消息时立即结束输入状态
    pub fn sent(&mut self) -> Option<bool> {
        self.last_keystroke.take().map(|_| false)
    }
}
