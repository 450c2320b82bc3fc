//! 定时轮询
//!
//! 轮询任务由 `PollHandle` 持有，句柄被丢弃时任务随之终止

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// 轮询任务句柄
#[derive(Debug)]
pub struct PollHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PollHandle {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        debug!("[Poll] ⏹️ 停止轮询: {}", self.name);
        self.handle.abort();
    }
}

/// 轮询间隔下限，`interval_at` 不接受零周期
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// 每隔 `period` 调用一次 `tick`，首次调用在一个周期之后
pub fn spawn_poller<F, Fut>(name: &'static str, period: Duration, tick: F) -> PollHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(MIN_PERIOD);
    debug!("[Poll] ▶️ 启动轮询: {}, 间隔: {:?}", name, period);
    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tick().await;
        }
    });
    PollHandle { name, handle }
}
