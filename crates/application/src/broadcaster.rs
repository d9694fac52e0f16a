use thiserror::Error;

use crate::events::ServerEvent;
use crate::presence::ConnectionId;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// 连接传输层：按句柄单播，或向所有已连接客户端广播。
///
/// 发送只是把事件放进连接的发送队列，不会阻塞调用方。
pub trait ConnectionHub: Send + Sync {
    fn send_to(&self, connection: ConnectionId, event: ServerEvent) -> Result<(), NotifyError>;

    /// 返回成功投递的连接数
    fn broadcast(&self, event: ServerEvent) -> usize;

    fn is_connected(&self, connection: ConnectionId) -> bool;
}
