//! 应用层实现。
//!
//! 在线状态、重复发送抑制、消息投递、确认状态机与历史查询，
//! 以及对存储与连接传输的抽象。

pub mod background;
pub mod broadcaster;
pub mod clock;
pub mod container;
pub mod dto;
pub mod error;
pub mod events;
pub mod local_broadcast;
pub mod memory;
pub mod presence;
pub mod repository;
pub mod services;
pub mod suppressor;

pub use background::BackgroundTasks;
pub use broadcaster::{ConnectionHub, NotifyError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use container::{InMemoryStorage, ServiceContainer, Storage};
pub use dto::{HistoryPage, MessageRecord, Pagination, SendOutcome};
pub use error::ApplicationError;
pub use events::{MessagePayload, ServerEvent, StatusUpdate};
pub use local_broadcast::LocalConnectionHub;
pub use presence::{ConnectionId, PresenceRegistry};
pub use repository::{GroupRepository, MessageRepository, UserDirectory};
pub use services::{
    DeliveryRouter, HistoryQuery, HistoryReader, SendMessageRequest, StatusTracker,
};
pub use suppressor::{DuplicateSuppressor, SuppressionKey};
