// 进程内的连接中心：每个连接一个无界 mpsc 发送队列
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;

use crate::broadcaster::{ConnectionHub, NotifyError};
use crate::events::ServerEvent;
use crate::presence::ConnectionId;

#[derive(Default)]
pub struct LocalConnectionHub {
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl LocalConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个新连接，返回句柄和该连接的事件接收端
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ConnectionId::generate();
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sender);
        (id, receiver)
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ConnectionHub for LocalConnectionHub {
    fn send_to(&self, connection: ConnectionId, event: ServerEvent) -> Result<(), NotifyError> {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let sender = connections
            .get(&connection)
            .ok_or(NotifyError::UnknownConnection(connection))?;
        sender
            .send(event)
            .map_err(|_| NotifyError::Closed(connection))
    }

    fn broadcast(&self, event: ServerEvent) -> usize {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        connections
            .values()
            .filter(|sender| sender.send(event.clone()).is_ok())
            .count()
    }

    fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&connection)
    }
}
