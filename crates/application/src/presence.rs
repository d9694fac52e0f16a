use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use domain::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broadcaster::ConnectionHub;
use crate::events::ServerEvent;

/// 在线连接句柄，仅在连接打开期间有效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 在线状态注册表
///
/// 维护 用户 → 当前连接句柄 的映射，每个在线用户恰好一条记录，
/// 重连时后写覆盖。注册表只存在于进程内，重启后由客户端重新 join。
/// 每次 join / leave 都向所有连接广播完整在线名单（不是增量）。
pub struct PresenceRegistry {
    entries: RwLock<HashMap<UserId, ConnectionId>>,
    hub: Arc<dyn ConnectionHub>,
}

impl PresenceRegistry {
    pub fn new(hub: Arc<dyn ConnectionHub>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hub,
        }
    }

    /// 注册或覆盖用户的连接句柄，并广播在线名单。
    ///
    /// 句柄已从连接中心断开时拒绝注册并返回 `false`，否则之后不会再有对应的 `leave`。
    pub fn join(&self, user_id: UserId, handle: ConnectionId) -> bool {
        let (previous, roster) = {
            let mut entries = self.write_entries();
            if !self.hub.is_connected(handle) {
                tracing::warn!(user_id = %user_id, connection_id = %handle, "连接已关闭，忽略上线");
                return false;
            }
            let previous = entries.insert(user_id, handle);
            (previous, Self::roster_of(&entries))
        };

        tracing::info!(
            user_id = %user_id,
            connection_id = %handle,
            replaced = previous.is_some(),
            "用户上线"
        );

        self.hub.broadcast(ServerEvent::OnlineUsers(roster));
        true
    }

    /// 按句柄反查并移除至多一条记录；找不到时静默忽略
    pub fn leave(&self, handle: ConnectionId) -> Option<UserId> {
        let (removed, roster) = {
            let mut entries = self.write_entries();
            let user_id = entries
                .iter()
                .find(|(_, connection)| **connection == handle)
                .map(|(user_id, _)| *user_id);
            if let Some(user_id) = user_id {
                entries.remove(&user_id);
            }
            (user_id, Self::roster_of(&entries))
        };

        let user_id = removed?;
        tracing::info!(user_id = %user_id, connection_id = %handle, "用户下线");
        self.hub.broadcast(ServerEvent::OnlineUsers(roster));
        Some(user_id)
    }

    pub fn lookup(&self, user_id: UserId) -> Option<ConnectionId> {
        self.read_entries().get(&user_id).copied()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.read_entries().contains_key(&user_id)
    }

    /// 当前在线用户（排序后返回）
    pub fn online_users(&self) -> Vec<UserId> {
        Self::roster_of(&self.read_entries())
    }

    /// 用户在线时向其当前连接推送事件，返回是否成功放入发送队列
    pub fn notify(&self, user_id: UserId, event: ServerEvent) -> bool {
        let Some(handle) = self.lookup(user_id) else {
            return false;
        };

        let event_name = event.name();
        match self.hub.send_to(handle, event) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(user_id = %user_id, event = event_name, error = %err, "推送事件失败");
                false
            }
        }
    }

    fn roster_of(entries: &HashMap<UserId, ConnectionId>) -> Vec<UserId> {
        let mut roster: Vec<UserId> = entries.keys().copied().collect();
        roster.sort();
        roster
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<UserId, ConnectionId>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<UserId, ConnectionId>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_broadcast::LocalConnectionHub;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn user() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    fn last_roster(rx: &mut UnboundedReceiver<ServerEvent>) -> Option<Vec<UserId>> {
        let mut roster = None;
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::OnlineUsers(users) = event {
                roster = Some(users);
            }
        }
        roster
    }

    #[test]
    fn join_broadcasts_full_roster_to_every_connection() {
        let hub = Arc::new(LocalConnectionHub::new());
        let registry = PresenceRegistry::new(hub.clone());
        let (observer, mut observer_rx) = hub.connect();
        let (alice_conn, _alice_rx) = hub.connect();
        let (alice, bob) = (user(), user());

        registry.join(alice, alice_conn);
        registry.join(bob, observer);

        let mut expected = vec![alice, bob];
        expected.sort();
        assert_eq!(last_roster(&mut observer_rx), Some(expected));
    }

    #[test]
    fn rejoin_overwrites_previous_handle() {
        let hub = Arc::new(LocalConnectionHub::new());
        let registry = PresenceRegistry::new(hub.clone());
        let alice = user();
        let (first, _first_rx) = hub.connect();
        let (second, _second_rx) = hub.connect();

        registry.join(alice, first);
        registry.join(alice, second);

        assert_eq!(registry.lookup(alice), Some(second));
        assert_eq!(registry.online_users(), vec![alice]);

        // 旧连接断开不影响新句柄
        assert_eq!(registry.leave(first), None);
        assert_eq!(registry.lookup(alice), Some(second));
    }

    #[test]
    fn leave_removes_only_matching_entry() {
        let hub = Arc::new(LocalConnectionHub::new());
        let registry = PresenceRegistry::new(hub.clone());
        let (alice, bob) = (user(), user());
        let (alice_conn, _a) = hub.connect();
        let (bob_conn, mut bob_rx) = hub.connect();

        registry.join(alice, alice_conn);
        registry.join(bob, bob_conn);

        assert_eq!(registry.leave(alice_conn), Some(alice));
        assert_eq!(registry.online_users(), vec![bob]);
        assert_eq!(last_roster(&mut bob_rx), Some(vec![bob]));
    }

    #[test]
    fn leave_with_unknown_handle_is_silent() {
        let hub = Arc::new(LocalConnectionHub::new());
        let registry = PresenceRegistry::new(hub.clone());
        let (observer, mut observer_rx) = hub.connect();
        registry.join(user(), observer);
        let _ = last_roster(&mut observer_rx);

        assert_eq!(registry.leave(ConnectionId::generate()), None);
        assert_eq!(last_roster(&mut observer_rx), None);
    }

    #[test]
    fn closed_handle_cannot_rejoin_after_leave() {
        let hub = Arc::new(LocalConnectionHub::new());
        let registry = PresenceRegistry::new(hub.clone());
        let alice = user();
        let (conn, _rx) = hub.connect();

        assert!(registry.join(alice, conn));
        assert_eq!(registry.leave(conn), Some(alice));
        hub.disconnect(conn);

        // 连接收尾之后迟到的 join
        assert!(!registry.join(alice, conn));
        assert!(!registry.is_online(alice));
        assert!(registry.online_users().is_empty());
    }

    #[test]
    fn notify_skips_offline_users() {
        let hub = Arc::new(LocalConnectionHub::new());
        let registry = PresenceRegistry::new(hub.clone());
        let alice = user();
        let (conn, mut rx) = hub.connect();

        let event = ServerEvent::Typing { sender_id: user() };
        assert!(!registry.notify(alice, event.clone()));

        registry.join(alice, conn);
        let _ = last_roster(&mut rx);
        assert!(registry.notify(alice, event.clone()));
        assert_eq!(rx.try_recv().unwrap(), event);
    }
}
