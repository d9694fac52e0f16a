use async_trait::async_trait;
use domain::{
    Acknowledgement, ConversationSelector, Group, GroupId, Message, MessageId, RepositoryError,
    Timestamp, UserId, UserProfile,
};

/// 消息存储：所有写操作都必须是单文档原子的。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 持久化新消息，返回后消息即视为已创建
    async fn create(&self, message: Message) -> Result<Message, RepositoryError>;

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    /// 原子地追加回执并单调推进状态；消息不存在时返回 `None`
    async fn acknowledge(
        &self,
        id: MessageId,
        ack: Acknowledgement,
    ) -> Result<Option<Message>, RepositoryError>;

    /// 把 sender → receiver 方向上所有未读消息置为已读，返回实际变更的消息
    async fn mark_conversation_read(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<Vec<MessageId>, RepositoryError>;

    /// 仅把仍处于 sent 的消息推进到 delivered，返回实际变更的消息
    async fn mark_delivered(&self, ids: Vec<MessageId>) -> Result<Vec<MessageId>, RepositoryError>;

    async fn count(&self, selector: ConversationSelector) -> Result<u64, RepositoryError>;

    // 按 created_at 倒序分页，调用方负责翻转
    async fn find_page(
        &self,
        selector: ConversationSelector,
        skip: u64,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn find_by_id(&self, id: GroupId) -> Result<Option<Group>, RepositoryError>;

    /// 刷新群组最近活跃时间（尽力而为）
    async fn touch(&self, id: GroupId, at: Timestamp) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_profile(&self, id: UserId) -> Result<Option<UserProfile>, RepositoryError>;
}
