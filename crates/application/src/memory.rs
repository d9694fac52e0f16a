//! 进程内存储实现
//!
//! 未配置数据库时使用，也是服务层测试的默认夹具。语义与 PostgreSQL 实现保持一致：
//! 每条消息的写操作都在一次写锁内完成。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    Acknowledgement, ConversationSelector, Group, GroupId, Message, MessageId, MessageStatus,
    RepositoryError, Timestamp, UserId, UserProfile,
};
use tokio::sync::RwLock;

use crate::repository::{GroupRepository, MessageRepository, UserDirectory};

#[derive(Default)]
pub struct InMemoryMessageRepository {
    // 按插入顺序保存
    messages: RwLock<Vec<Message>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut messages = self.messages.write().await;
        if messages.iter().any(|existing| existing.id == message.id) {
            return Err(RepositoryError::Conflict);
        }
        messages.push(message.clone());
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().find(|message| message.id == id).cloned())
    }

    async fn acknowledge(
        &self,
        id: MessageId,
        ack: Acknowledgement,
    ) -> Result<Option<Message>, RepositoryError> {
        let mut messages = self.messages.write().await;
        let Some(message) = messages.iter_mut().find(|message| message.id == id) else {
            return Ok(None);
        };
        message.apply(&ack);
        Ok(Some(message.clone()))
    }

    async fn mark_conversation_read(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        let mut messages = self.messages.write().await;
        let updated = messages
            .iter_mut()
            .filter(|message| {
                message.sender_id == sender_id && message.receiver_id() == Some(receiver_id)
            })
            .filter_map(|message| {
                message
                    .advance_status(MessageStatus::Read)
                    .then_some(message.id)
            })
            .collect();
        Ok(updated)
    }

    async fn mark_delivered(&self, ids: Vec<MessageId>) -> Result<Vec<MessageId>, RepositoryError> {
        let mut messages = self.messages.write().await;
        let updated = messages
            .iter_mut()
            .filter(|message| ids.contains(&message.id) && message.status == MessageStatus::Sent)
            .map(|message| {
                message.advance_status(MessageStatus::Delivered);
                message.id
            })
            .collect();
        Ok(updated)
    }

    async fn count(&self, selector: ConversationSelector) -> Result<u64, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|message| selector.matches(message))
            .count() as u64)
    }

    async fn find_page(
        &self,
        selector: ConversationSelector,
        skip: u64,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut matching: Vec<&Message> = messages
            .iter()
            .filter(|message| selector.matches(message))
            .collect();
        // 稳定排序：同一时间戳的消息后插入的排在前面
        matching.reverse();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(skip)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryGroupRepository {
    groups: RwLock<HashMap<GroupId, Group>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, group: Group) {
        self.groups.write().await.insert(group.id, group);
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn find_by_id(&self, id: GroupId) -> Result<Option<Group>, RepositoryError> {
        Ok(self.groups.read().await.get(&id).cloned())
    }

    async fn touch(&self, id: GroupId, at: Timestamp) -> Result<(), RepositoryError> {
        let mut groups = self.groups.write().await;
        let group = groups.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if at > group.updated_at {
            group.updated_at = at;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    profiles: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, profile: UserProfile) {
        self.profiles.write().await.insert(profile.id, profile);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_profile(&self, id: UserId) -> Result<Option<UserProfile>, RepositoryError> {
        Ok(self.profiles.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use domain::{AcknowledgementKind, MessageBody, MessageTarget, MessageType};
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    fn direct(sender: UserId, receiver: UserId, at: Timestamp) -> Message {
        Message::new(
            MessageId::generate(),
            sender,
            MessageTarget::Direct { receiver_id: receiver },
            MessageBody::parse("hello").unwrap(),
            MessageType::Text,
            at,
        )
    }

    #[tokio::test]
    async fn find_page_returns_newest_first() {
        let repo = InMemoryMessageRepository::new();
        let (a, b) = (user(), user());
        let start = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let message = direct(a, b, start + Duration::seconds(i));
            ids.push(message.id);
            repo.create(message).await.unwrap();
        }
        repo.create(direct(a, user(), start)).await.unwrap();

        let selector = ConversationSelector::Direct { user_a: b, user_b: a };
        assert_eq!(repo.count(selector).await.unwrap(), 5);

        let page: Vec<MessageId> = repo
            .find_page(selector, 1, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|message| message.id)
            .collect();
        assert_eq!(page, vec![ids[3], ids[2]]);
    }

    #[tokio::test]
    async fn mark_delivered_only_touches_sent_messages() {
        let repo = InMemoryMessageRepository::new();
        let (a, b) = (user(), user());
        let fresh = direct(a, b, Utc::now());
        let mut read = direct(a, b, Utc::now());
        read.advance_status(MessageStatus::Read);
        let (fresh_id, read_id) = (fresh.id, read.id);
        repo.create(fresh).await.unwrap();
        repo.create(read).await.unwrap();

        let updated = repo.mark_delivered(vec![fresh_id, read_id]).await.unwrap();
        assert_eq!(updated, vec![fresh_id]);
        let stored = repo.find_by_id(read_id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn acknowledge_missing_message_returns_none() {
        let repo = InMemoryMessageRepository::new();
        let ack = Acknowledgement {
            kind: AcknowledgementKind::Read,
            user_id: user(),
            at: Utc::now(),
        };
        assert!(repo
            .acknowledge(MessageId::generate(), ack)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn touch_unknown_group_is_not_found() {
        let repo = InMemoryGroupRepository::new();
        let err = repo
            .touch(GroupId::from(Uuid::new_v4()), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
