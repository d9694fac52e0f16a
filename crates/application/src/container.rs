//! 服务装配：按配置把存储、连接中心、在线状态与三个用例服务组装在一起

use std::sync::Arc;

use config::AppConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    background::BackgroundTasks,
    clock::{Clock, SystemClock},
    local_broadcast::LocalConnectionHub,
    memory::{InMemoryGroupRepository, InMemoryMessageRepository, InMemoryUserDirectory},
    presence::PresenceRegistry,
    repository::{GroupRepository, MessageRepository, UserDirectory},
    services::{
        DeliveryRouter, DeliveryRouterDependencies, HistoryReader, HistoryReaderDependencies,
        HistorySettings, StatusTracker, StatusTrackerDependencies,
    },
    suppressor::DuplicateSuppressor,
};

/// 三类存储协作方
#[derive(Clone)]
pub struct Storage {
    pub messages: Arc<dyn MessageRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub users: Arc<dyn UserDirectory>,
}

/// 内存存储，保留具体类型便于测试和开发环境预置数据
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    pub messages: Arc<InMemoryMessageRepository>,
    pub groups: Arc<InMemoryGroupRepository>,
    pub users: Arc<InMemoryUserDirectory>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(&self) -> Storage {
        Storage {
            messages: self.messages.clone(),
            groups: self.groups.clone(),
            users: self.users.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceContainer {
    pub config: Arc<AppConfig>,
    pub hub: Arc<LocalConnectionHub>,
    pub presence: Arc<PresenceRegistry>,
    pub suppressor: Arc<DuplicateSuppressor>,
    pub tasks: BackgroundTasks,
    pub groups: Arc<dyn GroupRepository>,
    pub delivery_router: Arc<DeliveryRouter>,
    pub status_tracker: Arc<StatusTracker>,
    pub history_reader: Arc<HistoryReader>,
}

impl ServiceContainer {
    /// 使用系统时钟组装；必须在 tokio 运行时内调用
    pub fn new(config: AppConfig, storage: Storage) -> Self {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    pub fn with_clock(config: AppConfig, storage: Storage, clock: Arc<dyn Clock>) -> Self {
        let hub = Arc::new(LocalConnectionHub::new());
        let presence = Arc::new(PresenceRegistry::new(hub.clone()));
        let suppressor = Arc::new(DuplicateSuppressor::from_config(
            &config.delivery,
            clock.clone(),
        ));
        let tasks = BackgroundTasks::start();

        let delivery_router = DeliveryRouter::new(DeliveryRouterDependencies {
            message_repository: storage.messages.clone(),
            group_repository: storage.groups.clone(),
            user_directory: storage.users.clone(),
            presence: presence.clone(),
            suppressor: suppressor.clone(),
            tasks: tasks.clone(),
            clock: clock.clone(),
        });

        let status_tracker = StatusTracker::new(StatusTrackerDependencies {
            message_repository: storage.messages.clone(),
            presence: presence.clone(),
            clock,
        });

        let history_reader = HistoryReader::new(HistoryReaderDependencies {
            message_repository: storage.messages.clone(),
            presence: presence.clone(),
            tasks: tasks.clone(),
            settings: HistorySettings::from(&config.history),
        });

        Self {
            config: Arc::new(config),
            hub,
            presence,
            suppressor,
            tasks,
            groups: storage.groups,
            delivery_router: Arc::new(delivery_router),
            status_tracker: Arc::new(status_tracker),
            history_reader: Arc::new(history_reader),
        }
    }

    /// 启动重复发送记录的周期清理
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.suppressor
            .clone()
            .spawn_sweeper(self.config.delivery.sweep_interval(), shutdown)
    }

    /// 等待所有后台任务结束
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
        tracing::info!(failed = self.tasks.failed_count(), "后台任务已全部结束");
    }
}
