use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use config::DeliveryConfig;
use domain::{MessageTarget, Timestamp, UserId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

/// 重复发送判定键：同一发送者、同一目标、完全相同的正文
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SuppressionKey {
    pub sender_id: UserId,
    pub target: MessageTarget,
    pub body: String,
}

impl SuppressionKey {
    pub fn new(sender_id: UserId, target: MessageTarget, body: impl Into<String>) -> Self {
        Self {
            sender_id,
            target,
            body: body.into(),
        }
    }
}

/// 重复发送抑制器
///
/// 折叠短时间内的重复发送（客户端重试），窗口内第二次发送视为已完成。
/// 基于内容判定，所以窗口内合法的重复消息同样会被折叠。
pub struct DuplicateSuppressor {
    /// 抑制窗口（毫秒）
    window_ms: i64,
    /// 记录保留时长（毫秒），不小于抑制窗口
    retention_ms: i64,
    clock: Arc<dyn Clock>,
    last_seen: Mutex<HashMap<SuppressionKey, Timestamp>>,
}

impl DuplicateSuppressor {
    pub fn new(window: Duration, retention: Duration, clock: Arc<dyn Clock>) -> Self {
        let window_ms = millis(window);
        Self {
            window_ms,
            retention_ms: millis(retention).max(window_ms),
            clock,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &DeliveryConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.suppression_window(),
            config.suppression_retention(),
            clock,
        )
    }

    /// 判断是否应折叠本次发送；无论结果如何都会把该键的时间刷新为现在
    pub fn should_suppress(&self, key: SuppressionKey) -> bool {
        self.should_suppress_at(key, self.clock.now())
    }

    /// 同 [`Self::should_suppress`]，以调用方给定的时间记录
    pub fn should_suppress_at(&self, key: SuppressionKey, now: Timestamp) -> bool {
        let mut last_seen = self.lock();
        let previous = last_seen.insert(key, now);

        match previous {
            Some(prior) => (now - prior).num_milliseconds() < self.window_ms,
            None => false,
        }
    }

    /// 撤销一次记录：仅当该键的时间仍是 `recorded_at` 时删除。
    ///
    /// 持久化失败后调用，使客户端重试不会被当作重复发送。
    pub fn forget(&self, key: &SuppressionKey, recorded_at: Timestamp) -> bool {
        let mut last_seen = self.lock();
        if last_seen.get(key) == Some(&recorded_at) {
            last_seen.remove(key);
            true
        } else {
            false
        }
    }

    /// 删除超过保留时长的记录，返回删除数量
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut last_seen = self.lock();
        let before = last_seen.len();
        last_seen.retain(|_, seen| (now - *seen).num_milliseconds() < self.retention_ms);
        before - last_seen.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 启动周期性清理任务，`shutdown` 取消后退出
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = self.len(), "清理过期的重复发送记录");
                        }
                    }
                }
            }
            tracing::info!("重复发送清理任务结束");
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SuppressionKey, Timestamp>> {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
