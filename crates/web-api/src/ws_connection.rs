use application::{ConnectionId, GroupRepository, ServerEvent};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{GroupId, MessageId, UserId};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::state::AppState;

/// 客户端经 WebSocket 发来的事件
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Join { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    MessageDelivered { message_id: MessageId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    MessageRead { message_id: MessageId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    Typing { receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    GroupTyping { group_id: GroupId },
}

/// 单个已认证的 WebSocket 连接
///
/// 连接建立时在连接中心注册发送队列，但只有客户端发送 `join` 之后
/// 才会出现在在线名单里。断开时同时清理两者。
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    user_id: UserId,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, user_id: UserId) -> Self {
        Self {
            socket,
            state,
            user_id,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            state,
            user_id,
        } = self;

        let hub = state.services.hub.clone();
        let (handle, mut events) = hub.connect();
        tracing::info!(user_id = %user_id, connection_id = %handle, "WebSocket 连接已建立");

        let (mut sender, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：推送事件与 pong 回应都经由这里写出
        let mut send_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    Some(event) = events.recv() => match serde_json::to_string(&event) {
                        Ok(json) => WsMessage::Text(json.into()),
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize server event");
                            continue;
                        }
                    },
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                    },
                    else => break,
                };

                if sender.send(frame).await.is_err() {
                    tracing::warn!("WebSocket 写入失败");
                    break;
                }
            }
        });

        let recv_state = state.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                if handle_incoming(&recv_state, handle, user_id, message, &cmd_tx)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => tracing::debug!(connection_id = %handle, "发送任务结束"),
            _ = &mut recv_task => tracing::debug!(connection_id = %handle, "接收任务结束"),
        }
        // 另一半不能在清理之后继续处理 join
        send_task.abort();
        recv_task.abort();

        // 先断开连接中心再移除在线记录，迟到的 join 会被拒绝
        hub.disconnect(handle);
        state.services.presence.leave(handle);
        tracing::info!(user_id = %user_id, connection_id = %handle, "WebSocket 连接已断开");
    }
}

#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}

/// 返回 `Err` 表示连接应当关闭
async fn handle_incoming(
    state: &AppState,
    handle: ConnectionId,
    user_id: UserId,
    message: WsMessage,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    match message {
        WsMessage::Close(_) => return Err(()),
        WsMessage::Ping(data) => {
            if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                return Err(());
            }
        }
        WsMessage::Pong(_) | WsMessage::Binary(_) => {}
        WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
            Ok(event) => handle_client_event(state, handle, user_id, event).await,
            Err(err) => tracing::debug!(error = %err, "忽略无法解析的客户端事件"),
        },
    }
    Ok(())
}

async fn handle_client_event(
    state: &AppState,
    handle: ConnectionId,
    user_id: UserId,
    event: ClientEvent,
) {
    let services = &state.services;

    match event {
        ClientEvent::Join { user_id: claimed } => {
            if claimed != user_id {
                tracing::warn!(user_id = %user_id, claimed = %claimed, "拒绝以他人身份上线");
                return;
            }
            services.presence.join(user_id, handle);
        }
        ClientEvent::MessageDelivered {
            message_id,
            user_id: claimed,
        } => {
            if claimed != user_id {
                tracing::warn!(user_id = %user_id, claimed = %claimed, "忽略代他人发送的确认");
                return;
            }
            if let Err(err) = services
                .status_tracker
                .acknowledge_delivered(message_id, user_id)
                .await
            {
                tracing::warn!(message_id = %message_id, error = %err, "送达确认失败");
            }
        }
        ClientEvent::MessageRead {
            message_id,
            user_id: claimed,
        } => {
            if claimed != user_id {
                tracing::warn!(user_id = %user_id, claimed = %claimed, "忽略代他人发送的确认");
                return;
            }
            if let Err(err) = services
                .status_tracker
                .acknowledge_read(message_id, user_id)
                .await
            {
                tracing::warn!(message_id = %message_id, error = %err, "已读确认失败");
            }
        }
        ClientEvent::Typing { receiver_id } => {
            services.presence.notify(
                receiver_id,
                ServerEvent::Typing { sender_id: user_id },
            );
        }
        ClientEvent::GroupTyping { group_id } => {
            let group = match services.groups.find_by_id(group_id).await {
                Ok(Some(group)) if group.is_member(user_id) => group,
                Ok(_) => return,
                Err(err) => {
                    tracing::warn!(group_id = %group_id, error = %err, "查询群组失败");
                    return;
                }
            };

            for member in group.members_except(user_id) {
                services.presence.notify(
                    member,
                    ServerEvent::GroupTyping {
                        group_id,
                        sender_id: user_id,
                    },
                );
            }
        }
    }
}
