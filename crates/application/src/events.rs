//! 推送给客户端的实时事件

use domain::{GroupId, MessageId, MessageStatus, UserId, UserProfile};
use serde::{Deserialize, Serialize};

use crate::dto::MessageRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub message: MessageRecord,
    pub sender: UserProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub message_id: MessageId,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// 完整在线名单，每次 join/leave 都全量下发
    OnlineUsers(Vec<UserId>),
    ReceiveMessage(MessagePayload),
    ReceiveGroupMessage(MessagePayload),
    MessageStatusUpdate(StatusUpdate),
    #[serde(rename_all = "camelCase")]
    MessagesMarkedRead { receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    Typing { sender_id: UserId },
    #[serde(rename_all = "camelCase")]
    GroupTyping { group_id: GroupId, sender_id: UserId },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::OnlineUsers(_) => "onlineUsers",
            ServerEvent::ReceiveMessage(_) => "receiveMessage",
            ServerEvent::ReceiveGroupMessage(_) => "receiveGroupMessage",
            ServerEvent::MessageStatusUpdate(_) => "messageStatusUpdate",
            ServerEvent::MessagesMarkedRead { .. } => "messagesMarkedRead",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::GroupTyping { .. } => "groupTyping",
        }
    }
}
