use std::sync::Arc;

use domain::{
    DomainError, GroupId, Message, MessageBody, MessageId, MessageTarget, MessageType, Timestamp,
    UserId, UserProfile,
};

use crate::{
    background::BackgroundTasks,
    clock::Clock,
    dto::{MessageRecord, SendOutcome},
    error::ApplicationError,
    events::{MessagePayload, ServerEvent},
    presence::PresenceRegistry,
    repository::{GroupRepository, MessageRepository, UserDirectory},
    suppressor::{DuplicateSuppressor, SuppressionKey},
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub target: MessageTarget,
    pub body: String,
    pub message_type: MessageType,
}

pub struct DeliveryRouterDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub group_repository: Arc<dyn GroupRepository>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub presence: Arc<PresenceRegistry>,
    pub suppressor: Arc<DuplicateSuppressor>,
    pub tasks: BackgroundTasks,
    pub clock: Arc<dyn Clock>,
}

/// 消息投递路由
///
/// 持久化在请求路径上同步完成；扇出推送与群组活跃时间刷新交给后台任务，
/// 它们的失败只记录日志，不影响发送结果。
pub struct DeliveryRouter {
    deps: DeliveryRouterDependencies,
}

impl DeliveryRouter {
    pub fn new(deps: DeliveryRouterDependencies) -> Self {
        Self { deps }
    }

    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<SendOutcome, ApplicationError> {
        let sender_id = request.sender_id;
        let body = MessageBody::parse(request.body)?;

        // 群聊成员列表每次发送都重新读取
        let members = match request.target {
            MessageTarget::Direct { receiver_id } => {
                if receiver_id == sender_id {
                    return Err(DomainError::invalid_argument(
                        "receiver_id",
                        "cannot send a direct message to yourself",
                    )
                    .into());
                }
                Vec::new()
            }
            MessageTarget::Group { group_id } => {
                let group = self
                    .deps
                    .group_repository
                    .find_by_id(group_id)
                    .await?
                    .ok_or(DomainError::GroupNotFound)?;
                if !group.is_member(sender_id) {
                    return Err(DomainError::NotGroupMember.into());
                }
                group.members_except(sender_id)
            }
        };

        let now = self.deps.clock.now();
        let key = SuppressionKey::new(sender_id, request.target, body.as_str());
        if self.deps.suppressor.should_suppress_at(key.clone(), now) {
            tracing::debug!(sender_id = %sender_id, "重复发送已折叠");
            return Ok(SendOutcome::Duplicate);
        }

        let mut message = Message::new(
            MessageId::generate(),
            sender_id,
            request.target,
            body,
            request.message_type,
            now,
        );

        let online: Vec<UserId> = match request.target {
            MessageTarget::Direct { receiver_id } => {
                if self.deps.presence.is_online(receiver_id) {
                    vec![receiver_id]
                } else {
                    Vec::new()
                }
            }
            MessageTarget::Group { .. } => members
                .iter()
                .copied()
                .filter(|member| self.deps.presence.is_online(*member))
                .collect(),
        };
        message.deliver_optimistically(online);

        let stored = match self.deps.message_repository.create(message).await {
            Ok(stored) => stored,
            Err(err) => {
                // 未持久化就不算发送过，重试不能被折叠
                self.deps.suppressor.forget(&key, now);
                return Err(err.into());
            }
        };
        tracing::info!(
            message_id = %stored.id,
            sender_id = %sender_id,
            status = %stored.status,
            "消息已持久化"
        );

        let record = MessageRecord::from(&stored);
        let recipients = match stored.target {
            MessageTarget::Direct { receiver_id } => vec![receiver_id],
            MessageTarget::Group { .. } => members,
        };
        self.spawn_fan_out(record.clone(), recipients, stored.is_group());

        if let MessageTarget::Group { group_id } = stored.target {
            self.spawn_group_touch(group_id, stored.created_at);
        }

        Ok(SendOutcome::Created(record))
    }

    fn spawn_fan_out(&self, record: MessageRecord, recipients: Vec<UserId>, is_group: bool) {
        let presence = self.deps.presence.clone();
        let directory = self.deps.user_directory.clone();

        self.deps.tasks.spawn("message_fan_out", async move {
            let sender = match directory.find_profile(record.sender_id).await {
                Ok(Some(profile)) => profile,
                Ok(None) => UserProfile::anonymous(record.sender_id),
                Err(err) => {
                    tracing::warn!(
                        user_id = %record.sender_id,
                        error = %err,
                        "读取发送者资料失败，使用匿名资料"
                    );
                    UserProfile::anonymous(record.sender_id)
                }
            };

            let message_id = record.id;
            let payload = MessagePayload {
                message: record,
                sender,
            };

            // 推送时才解析连接句柄
            let mut delivered = 0usize;
            for recipient in recipients {
                let event = if is_group {
                    ServerEvent::ReceiveGroupMessage(payload.clone())
                } else {
                    ServerEvent::ReceiveMessage(payload.clone())
                };
                if presence.notify(recipient, event) {
                    delivered += 1;
                }
            }

            tracing::debug!(message_id = %message_id, delivered, "新消息推送完成");
            Ok(())
        });
    }

    fn spawn_group_touch(&self, group_id: GroupId, at: Timestamp) {
        let groups = self.deps.group_repository.clone();
        self.deps.tasks.spawn("group_touch", async move {
            groups.touch(group_id, at).await?;
            Ok(())
        });
    }
}
