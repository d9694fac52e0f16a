use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{GroupId, MessageId, Timestamp, UserId};

/// 消息体最大长度（字符数）
pub const MAX_BODY_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
        }
    }
}

impl FromStr for MessageType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            other => Err(DomainError::invalid_argument(
                "message_type",
                format!("unknown message type `{other}`"),
            )),
        }
    }
}

/// 消息的粗粒度状态，只能沿 sent → delivered → read 前进。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// 存储层使用的有序编码
    pub fn rank(self) -> i16 {
        match self {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Read => 2,
        }
    }

    pub fn from_rank(rank: i16) -> Option<Self> {
        match rank {
            0 => Some(MessageStatus::Sent),
            1 => Some(MessageStatus::Delivered),
            2 => Some(MessageStatus::Read),
            _ => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        };
        f.write_str(label)
    }
}

/// 消息目标：单聊接收者或群组，二者必居其一。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessageTarget {
    #[serde(rename_all = "camelCase")]
    Direct { receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    Group { group_id: GroupId },
}

impl MessageTarget {
    pub fn receiver_id(&self) -> Option<UserId> {
        match self {
            MessageTarget::Direct { receiver_id } => Some(*receiver_id),
            MessageTarget::Group { .. } => None,
        }
    }

    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            MessageTarget::Direct { .. } => None,
            MessageTarget::Group { group_id } => Some(*group_id),
        }
    }

    /// 从存储层的两个可空列还原目标；两者同时存在或同时缺失都视为损坏数据。
    pub fn from_columns(
        receiver_id: Option<UserId>,
        group_id: Option<GroupId>,
    ) -> Result<Self, DomainError> {
        match (receiver_id, group_id) {
            (Some(receiver_id), None) => Ok(MessageTarget::Direct { receiver_id }),
            (None, Some(group_id)) => Ok(MessageTarget::Group { group_id }),
            _ => Err(DomainError::invalid_argument(
                "target",
                "exactly one of receiver_id and group_id must be set",
            )),
        }
    }
}

/// 经过校验的消息正文。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageBody(String);

impl MessageBody {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::invalid_argument("body", "cannot be empty"));
        }
        if value.chars().count() > MAX_BODY_CHARS {
            return Err(DomainError::invalid_argument("body", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// 某个成员的送达/已读记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub user_id: UserId,
    pub at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcknowledgementKind {
    Delivered,
    Read,
}

impl AcknowledgementKind {
    pub fn target_status(self) -> MessageStatus {
        match self {
            AcknowledgementKind::Delivered => MessageStatus::Delivered,
            AcknowledgementKind::Read => MessageStatus::Read,
        }
    }
}

/// 客户端发来的一次确认
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    pub kind: AcknowledgementKind,
    pub user_id: UserId,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub target: MessageTarget,
    pub body: MessageBody,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub delivered_to: Vec<Receipt>,
    pub read_by: Vec<Receipt>,
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        sender_id: UserId,
        target: MessageTarget,
        body: MessageBody,
        message_type: MessageType,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            sender_id,
            target,
            body,
            message_type,
            status: MessageStatus::Sent,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            created_at,
        }
    }

    /// 发送时的乐观送达：单聊接收者在线即视为已送达；
    /// 群聊为每个在线成员（发送者除外）写入送达记录。
    pub fn deliver_optimistically<I>(&mut self, online: I)
    where
        I: IntoIterator<Item = UserId>,
    {
        let at = self.created_at;
        match self.target {
            MessageTarget::Direct { receiver_id } => {
                if online.into_iter().any(|user_id| user_id == receiver_id) {
                    self.advance_status(MessageStatus::Delivered);
                }
            }
            MessageTarget::Group { .. } => {
                for user_id in online {
                    if user_id != self.sender_id {
                        insert_receipt(&mut self.delivered_to, user_id, at);
                    }
                }
                if !self.delivered_to.is_empty() {
                    self.advance_status(MessageStatus::Delivered);
                }
            }
        }
    }

    /// 应用一次确认，返回状态或回执列表是否发生变化。
    ///
    /// 发送者自己的确认、以及单聊中非接收者的确认都会被忽略。
    /// 群聊的已读回执不要求同一成员先有送达回执。
    pub fn apply(&mut self, ack: &Acknowledgement) -> bool {
        if !self.accepts_acknowledgement_from(ack.user_id) {
            return false;
        }

        let receipt_added = match self.target {
            MessageTarget::Direct { .. } => false,
            MessageTarget::Group { .. } => {
                let receipts = match ack.kind {
                    AcknowledgementKind::Delivered => &mut self.delivered_to,
                    AcknowledgementKind::Read => &mut self.read_by,
                };
                insert_receipt(receipts, ack.user_id, ack.at)
            }
        };

        let advanced = self.advance_status(ack.kind.target_status());
        receipt_added || advanced
    }

    /// 发送者以外的接收方才能确认：单聊只能是接收者本人，群聊是任一其他用户
    pub fn accepts_acknowledgement_from(&self, user_id: UserId) -> bool {
        if user_id == self.sender_id {
            return false;
        }
        match self.target {
            MessageTarget::Direct { receiver_id } => receiver_id == user_id,
            MessageTarget::Group { .. } => true,
        }
    }

    /// 单调推进状态；目标状态不高于当前状态时什么也不做。
    pub fn advance_status(&mut self, next: MessageStatus) -> bool {
        if next > self.status {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn receiver_id(&self) -> Option<UserId> {
        self.target.receiver_id()
    }

    pub fn group_id(&self) -> Option<GroupId> {
        self.target.group_id()
    }

    pub fn is_group(&self) -> bool {
        matches!(self.target, MessageTarget::Group { .. })
    }
}

fn insert_receipt(receipts: &mut Vec<Receipt>, user_id: UserId, at: Timestamp) -> bool {
    if receipts.iter().any(|receipt| receipt.user_id == user_id) {
        return false;
    }
    receipts.push(Receipt { user_id, at });
    true
}
