//! 消息投递核心领域模型
//!
//! 包含消息实体、确认状态机、会话选择器以及群组/用户的只读投影。

pub mod conversation;
pub mod errors;
pub mod group;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::ConversationSelector;
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use group::Group;
pub use message::{
    Acknowledgement, AcknowledgementKind, Message, MessageBody, MessageStatus, MessageTarget,
    MessageType, Receipt,
};
pub use user::UserProfile;
pub use value_objects::{GroupId, MessageId, Timestamp, UserId};
