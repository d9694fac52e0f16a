use domain::{
    GroupId, Message, MessageId, MessageStatus, MessageType, Receipt, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

/// 返回给发送者与推送给接收者的消息投影
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    pub body: String,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub delivered_to: Vec<Receipt>,
    pub read_by: Vec<Receipt>,
    pub created_at: Timestamp,
}

impl From<&Message> for MessageRecord {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id(),
            group_id: message.group_id(),
            body: message.body.as_str().to_owned(),
            message_type: message.message_type,
            status: message.status,
            delivered_to: message.delivered_to.clone(),
            read_by: message.read_by.clone(),
            created_at: message.created_at,
        }
    }
}

/// 发送结果：新建的消息，或被重复抑制折叠的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Created(MessageRecord),
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_messages: u64,
    pub total_pages: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// 页内按 created_at 从旧到新排列
    pub messages: Vec<MessageRecord>,
    pub pagination: Pagination,
}

impl HistoryPage {
    /// 超时降级时返回的空页；调用方应视为"稍后重试"而非会话为空
    pub fn empty(page: u32, limit: u32) -> Self {
        Self {
            messages: Vec::new(),
            pagination: Pagination {
                page,
                limit,
                total_messages: 0,
                total_pages: 0,
                has_more: false,
            },
        }
    }
}
