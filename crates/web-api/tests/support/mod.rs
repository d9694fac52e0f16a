#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{InMemoryStorage, ServiceContainer};
use chrono::Utc;
use config::AppConfig;
use domain::{Group, GroupId, UserId, UserProfile};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 基于内存存储启动的完整 HTTP/WebSocket 服务
pub struct TestServer {
    pub addr: SocketAddr,
    pub storage: InMemoryStorage,
    pub services: ServiceContainer,
    pub jwt: Arc<JwtService>,
    pub client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let storage = InMemoryStorage::new();
        let services = ServiceContainer::new(AppConfig::default(), storage.storage());
        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "test-secret-key".to_string(),
            expiration_hours: 1,
        }));
        let app = router(AppState::new(services.clone(), jwt.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            storage,
            services,
            jwt,
            client: reqwest::Client::new(),
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token(&self, user_id: UserId) -> String {
        self.jwt.generate_token(user_id).expect("token")
    }

    pub async fn user(&self, username: &str) -> UserId {
        let id = UserId::from(Uuid::new_v4());
        self.storage
            .users
            .insert(UserProfile {
                id,
                username: Some(username.to_string()),
                avatar_url: None,
            })
            .await;
        id
    }

    pub async fn group(&self, members: &[UserId]) -> GroupId {
        let id = GroupId::from(Uuid::new_v4());
        self.storage
            .groups
            .insert(Group {
                id,
                name: "team".to_string(),
                members: members.to_vec(),
                updated_at: Utc::now(),
            })
            .await;
        id
    }

    /// 建立 WebSocket 连接并完成 join，返回时已消费自己上线引起的名单推送
    pub async fn join(&self, user_id: UserId) -> WsStream {
        let url = format!("ws://{}/ws?token={}", self.addr, self.token(user_id));
        let (mut ws, _) = connect_async(url).await.expect("ws connect");

        send_event(
            &mut ws,
            serde_json::json!({ "event": "join", "data": { "userId": user_id } }),
        )
        .await;

        let roster = next_event_named(&mut ws, "onlineUsers").await;
        assert!(roster["data"]
            .as_array()
            .expect("roster array")
            .contains(&Value::String(user_id.to_string())));
        ws
    }

    /// 等待后台投递任务全部完成
    pub async fn settle(&self) {
        self.services.tasks.drain().await;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send_event(ws: &mut WsStream, event: Value) {
    ws.send(TungsteniteMessage::Text(event.to_string().into()))
        .await
        .expect("ws send");
}

/// 读取下一条指定名称的服务端事件，跳过其它事件
pub async fn next_event_named(ws: &mut WsStream, name: &str) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            let frame = ws.next().await.expect("ws closed").expect("ws error");
            if let TungsteniteMessage::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).expect("event json");
                if value["event"] == name {
                    return value;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}

/// 在给定时间内没有收到指定事件
pub async fn assert_no_event_named(ws: &mut WsStream, name: &str, wait: Duration) {
    let result = timeout(wait, next_event_named(ws, name)).await;
    assert!(result.is_err(), "unexpected {name} event: {result:?}");
}
