//! 服务层测试夹具：内存存储 + 进程内连接中心 + 手动时钟

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::{Group, GroupId, MessageTarget, MessageType, UserId};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::{
    background::BackgroundTasks,
    clock::ManualClock,
    events::ServerEvent,
    local_broadcast::LocalConnectionHub,
    memory::{InMemoryGroupRepository, InMemoryMessageRepository, InMemoryUserDirectory},
    presence::PresenceRegistry,
    repository::{GroupRepository, MessageRepository, UserDirectory},
    suppressor::DuplicateSuppressor,
};

use super::{
    DeliveryRouter, DeliveryRouterDependencies, HistoryReader, HistoryReaderDependencies,
    HistorySettings, SendMessageRequest, StatusTracker, StatusTrackerDependencies,
};

pub struct Harness {
    pub hub: Arc<LocalConnectionHub>,
    pub presence: Arc<PresenceRegistry>,
    pub messages: Arc<InMemoryMessageRepository>,
    pub groups: Arc<InMemoryGroupRepository>,
    pub users: Arc<InMemoryUserDirectory>,
    pub clock: Arc<ManualClock>,
    pub suppressor: Arc<DuplicateSuppressor>,
    pub tasks: BackgroundTasks,
}

impl Harness {
    pub fn new() -> Self {
        let hub = Arc::new(LocalConnectionHub::new());
        let clock = Arc::new(ManualClock::default());
        Self {
            presence: Arc::new(PresenceRegistry::new(hub.clone())),
            hub,
            messages: Arc::new(InMemoryMessageRepository::new()),
            groups: Arc::new(InMemoryGroupRepository::new()),
            users: Arc::new(InMemoryUserDirectory::new()),
            suppressor: Arc::new(DuplicateSuppressor::new(
                Duration::from_millis(3_000),
                Duration::from_millis(10_000),
                clock.clone(),
            )),
            clock,
            tasks: BackgroundTasks::start(),
        }
    }

    pub fn router(&self) -> DeliveryRouter {
        self.router_with(self.messages.clone(), self.groups.clone(), self.users.clone())
    }

    pub fn router_with(
        &self,
        message_repository: Arc<dyn MessageRepository>,
        group_repository: Arc<dyn GroupRepository>,
        user_directory: Arc<dyn UserDirectory>,
    ) -> DeliveryRouter {
        DeliveryRouter::new(DeliveryRouterDependencies {
            message_repository,
            group_repository,
            user_directory,
            presence: self.presence.clone(),
            suppressor: self.suppressor.clone(),
            tasks: self.tasks.clone(),
            clock: self.clock.clone(),
        })
    }

    pub fn tracker(&self) -> StatusTracker {
        StatusTracker::new(StatusTrackerDependencies {
            message_repository: self.messages.clone(),
            presence: self.presence.clone(),
            clock: self.clock.clone(),
        })
    }

    pub fn reader(&self) -> HistoryReader {
        self.reader_with(self.messages.clone(), HistorySettings::default())
    }

    pub fn reader_with(
        &self,
        message_repository: Arc<dyn MessageRepository>,
        settings: HistorySettings,
    ) -> HistoryReader {
        HistoryReader::new(HistoryReaderDependencies {
            message_repository,
            presence: self.presence.clone(),
            tasks: self.tasks.clone(),
            settings,
        })
    }

    /// 用户上线，返回其连接的事件接收端（已清空上线广播）
    pub fn go_online(&self, user_id: UserId) -> UnboundedReceiver<ServerEvent> {
        let (handle, mut rx) = self.hub.connect();
        self.presence.join(user_id, handle);
        while rx.try_recv().is_ok() {}
        rx
    }

    pub async fn group_with(&self, members: &[UserId]) -> GroupId {
        let id = GroupId::from(Uuid::new_v4());
        self.groups
            .insert(Group {
                id,
                name: "team".to_string(),
                members: members.to_vec(),
                updated_at: Utc::now() - chrono::Duration::days(1),
            })
            .await;
        id
    }
}

pub fn user() -> UserId {
    UserId::from(Uuid::new_v4())
}

pub fn direct(sender_id: UserId, receiver_id: UserId, body: &str) -> SendMessageRequest {
    SendMessageRequest {
        sender_id,
        target: MessageTarget::Direct { receiver_id },
        body: body.to_string(),
        message_type: MessageType::Text,
    }
}

pub fn to_group(sender_id: UserId, group_id: GroupId, body: &str) -> SendMessageRequest {
    SendMessageRequest {
        sender_id,
        target: MessageTarget::Group { group_id },
        body: body.to_string(),
        message_type: MessageType::Text,
    }
}

/// 取出所有已到达的事件，忽略在线名单广播
pub fn drain_events(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if !matches!(event, ServerEvent::OnlineUsers(_)) {
            events.push(event);
        }
    }
    events
}
