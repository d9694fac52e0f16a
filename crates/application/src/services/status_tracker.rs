use std::sync::Arc;

use domain::{Acknowledgement, AcknowledgementKind, MessageId, MessageStatus, UserId};

use crate::{
    clock::Clock,
    error::ApplicationError,
    events::{ServerEvent, StatusUpdate},
    presence::PresenceRegistry,
    repository::MessageRepository,
};

pub struct StatusTrackerDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub presence: Arc<PresenceRegistry>,
    pub clock: Arc<dyn Clock>,
}

/// 送达 / 已读确认
///
/// 所有操作都是幂等的；消息不存在或发送者离线都不算错误。
pub struct StatusTracker {
    deps: StatusTrackerDependencies,
}

impl StatusTracker {
    pub fn new(deps: StatusTrackerDependencies) -> Self {
        Self { deps }
    }

    pub async fn acknowledge_delivered(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<MessageStatus>, ApplicationError> {
        self.acknowledge(message_id, user_id, AcknowledgementKind::Delivered)
            .await
    }

    pub async fn acknowledge_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<MessageStatus>, ApplicationError> {
        self.acknowledge(message_id, user_id, AcknowledgementKind::Read)
            .await
    }

    /// 返回确认后的粗粒度状态；消息不存在或确认方无权确认时返回 `None`
    async fn acknowledge(
        &self,
        message_id: MessageId,
        user_id: UserId,
        kind: AcknowledgementKind,
    ) -> Result<Option<MessageStatus>, ApplicationError> {
        let ack = Acknowledgement {
            kind,
            user_id,
            at: self.deps.clock.now(),
        };

        let Some(message) = self
            .deps
            .message_repository
            .acknowledge(message_id, ack)
            .await?
        else {
            tracing::debug!(message_id = %message_id, "确认的消息不存在，忽略");
            return Ok(None);
        };

        if !message.accepts_acknowledgement_from(user_id) {
            tracing::debug!(
                message_id = %message_id,
                user_id = %user_id,
                "忽略非接收方的确认"
            );
            return Ok(None);
        }

        let notified = self.deps.presence.notify(
            message.sender_id,
            ServerEvent::MessageStatusUpdate(StatusUpdate {
                message_id,
                status: message.status,
            }),
        );
        tracing::debug!(
            message_id = %message_id,
            user_id = %user_id,
            status = %message.status,
            notified,
            "消息确认已记录"
        );

        Ok(Some(message.status))
    }

    /// 把 sender → receiver 方向上的消息全部置为已读，返回实际变更的条数。
    ///
    /// 发送者在线时收到一条汇总通知，不逐条推送。
    pub async fn mark_conversation_read(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<usize, ApplicationError> {
        let updated = self
            .deps
            .message_repository
            .mark_conversation_read(sender_id, receiver_id)
            .await?;

        let notified = self
            .deps
            .presence
            .notify(sender_id, ServerEvent::MessagesMarkedRead { receiver_id });
        tracing::info!(
            sender_id = %sender_id,
            receiver_id = %receiver_id,
            updated = updated.len(),
            notified,
            "会话已标记为已读"
        );

        Ok(updated.len())
    }
}
