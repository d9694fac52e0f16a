//! 后台任务监管
//!
//! 发送后的扇出、群组活跃时间刷新、历史读取的送达回写都不在请求路径上等待。
//! 这些任务统一由 [`BackgroundTasks`] 启动：失败通过独立的错误通道上报，
//! 由上报任务记录日志后丢弃，绝不回传给请求方。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use crate::error::ApplicationError;

/// 一次后台任务失败
#[derive(Debug)]
pub struct TaskFailure {
    pub task: &'static str,
    pub error: ApplicationError,
}

#[derive(Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    failures: mpsc::UnboundedSender<TaskFailure>,
    failed: Arc<AtomicU64>,
}

impl BackgroundTasks {
    /// 创建任务集合并启动失败上报任务，必须在 tokio 运行时内调用
    pub fn start() -> Self {
        let (failures, mut receiver) = mpsc::unbounded_channel::<TaskFailure>();

        tokio::spawn(async move {
            while let Some(failure) = receiver.recv().await {
                tracing::warn!(
                    task = failure.task,
                    error = %failure.error,
                    "后台任务失败，已记录并丢弃"
                );
            }
        });

        Self {
            tracker: TaskTracker::new(),
            failures,
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn spawn<F>(&self, task: &'static str, future: F)
    where
        F: Future<Output = Result<(), ApplicationError>> + Send + 'static,
    {
        let failures = self.failures.clone();
        let failed = self.failed.clone();
        self.tracker.spawn(async move {
            if let Err(error) = future.await {
                failed.fetch_add(1, Ordering::Relaxed);
                // 上报任务已退出时只能放弃
                let _ = failures.send(TaskFailure { task, error });
            }
        });
    }

    /// 等待当前所有已启动的任务完成，之后仍可继续启动新任务
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// 停止接收新任务并等待存量任务完成（优雅停机）
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}
