use std::sync::Arc;

use application::{GroupRepository, MessageRepository, Storage, UserDirectory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Acknowledgement, AcknowledgementKind, ConversationSelector, Group, GroupId, Message,
    MessageBody, MessageId, MessageStatus, MessageTarget, MessageType, Receipt, RepositoryError,
    Timestamp, UserId, UserProfile,
};
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use uuid::Uuid;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict;
        }
    }
    RepositoryError::storage_with_source("database query failed", err)
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, group_id, body, message_type, status, \
     delivered_to, read_by, created_at";

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Option<Uuid>,
    group_id: Option<Uuid>,
    body: String,
    message_type: String,
    status: i16,
    delivered_to: Json<Vec<Receipt>>,
    read_by: Json<Vec<Receipt>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = RepositoryError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let target = MessageTarget::from_columns(
            row.receiver_id.map(UserId::from),
            row.group_id.map(GroupId::from),
        )
        .map_err(|err| invalid_data(err.to_string()))?;
        let body = MessageBody::parse(row.body).map_err(|err| invalid_data(err.to_string()))?;
        let message_type = row
            .message_type
            .parse::<MessageType>()
            .map_err(|err| invalid_data(err.to_string()))?;
        let status = MessageStatus::from_rank(row.status)
            .ok_or_else(|| invalid_data(format!("unknown message status {}", row.status)))?;

        Ok(Message {
            id: MessageId::from(row.id),
            sender_id: UserId::from(row.sender_id),
            target,
            body,
            message_type,
            status,
            delivered_to: row.delivered_to.0,
            read_by: row.read_by.0,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
        let query = format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(Uuid::from(message.id))
            .bind(Uuid::from(message.sender_id))
            .bind(message.receiver_id().map(Uuid::from))
            .bind(message.group_id().map(Uuid::from))
            .bind(message.body.as_str())
            .bind(message.message_type.as_str())
            .bind(message.status.rank())
            .bind(Json(&message.delivered_to))
            .bind(Json(&message.read_by))
            .bind(message.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Message::try_from(row)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        row.map(Message::try_from).transpose()
    }

    async fn acknowledge(
        &self,
        id: MessageId,
        ack: Acknowledgement,
    ) -> Result<Option<Message>, RepositoryError> {
        let column = match ack.kind {
            AcknowledgementKind::Delivered => "delivered_to",
            AcknowledgementKind::Read => "read_by",
        };
        let user_id = Uuid::from(ack.user_id);
        let probe = json!([{ "userId": user_id }]);
        let receipt = vec![Receipt {
            user_id: ack.user_id,
            at: ack.at,
        }];

        // 单条语句内完成：只有群聊追加回执，重复用户靠 @> 过滤；状态用 GREATEST 保证不回退。
        // 不被接受的确认（发送者本人、单聊非接收者）不做修改，原样返回当前行。
        let query = format!(
            "WITH updated AS ( \
                 UPDATE messages SET \
                     {column} = CASE \
                         WHEN group_id IS NOT NULL AND NOT {column} @> $3 THEN {column} || $4 \
                         ELSE {column} END, \
                     status = GREATEST(status, $5) \
                 WHERE id = $1 AND sender_id <> $2 \
                   AND (group_id IS NOT NULL OR receiver_id = $2) \
                 RETURNING {MESSAGE_COLUMNS} \
             ) \
             SELECT {MESSAGE_COLUMNS} FROM updated \
             UNION ALL \
             SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE id = $1 AND NOT EXISTS (SELECT 1 FROM updated)"
        );
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(Uuid::from(id))
            .bind(user_id)
            .bind(Json(probe))
            .bind(Json(receipt))
            .bind(ack.kind.target_status().rank())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        row.map(Message::try_from).transpose()
    }

    async fn mark_conversation_read(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE messages SET status = $3
            WHERE sender_id = $1 AND receiver_id = $2 AND status < $3
            RETURNING id
            "#,
        )
        .bind(Uuid::from(sender_id))
        .bind(Uuid::from(receiver_id))
        .bind(MessageStatus::Read.rank())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(ids.into_iter().map(MessageId::from).collect())
    }

    async fn mark_delivered(&self, ids: Vec<MessageId>) -> Result<Vec<MessageId>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.into_iter().map(Uuid::from).collect();
        let updated: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE messages SET status = $2
            WHERE id = ANY($1) AND status = $3
            RETURNING id
            "#,
        )
        .bind(&ids)
        .bind(MessageStatus::Delivered.rank())
        .bind(MessageStatus::Sent.rank())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(updated.into_iter().map(MessageId::from).collect())
    }

    async fn count(&self, selector: ConversationSelector) -> Result<u64, RepositoryError> {
        let (filter, params) = selector_filter(selector);
        let query = format!("SELECT COUNT(*) FROM messages WHERE {filter}");
        let mut count = sqlx::query_scalar::<_, i64>(&query);
        for param in params {
            count = count.bind(param);
        }
        let total = count.fetch_one(&self.pool).await.map_err(map_sqlx_err)?;

        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn find_page(
        &self,
        selector: ConversationSelector,
        skip: u64,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let (filter, params) = selector_filter(selector);
        let next = params.len() + 1;
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE {filter} \
             ORDER BY created_at DESC, id DESC OFFSET ${} LIMIT ${}",
            next,
            next + 1
        );
        let mut page = sqlx::query_as::<_, MessageRow>(&query);
        for param in params {
            page = page.bind(param);
        }
        let rows = page
            .bind(i64::try_from(skip).unwrap_or(i64::MAX))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        rows.into_iter().map(Message::try_from).collect()
    }
}

/// 会话选择器对应的 WHERE 子句及其参数（占位符从 $1 开始）
fn selector_filter(selector: ConversationSelector) -> (&'static str, Vec<Uuid>) {
    match selector {
        ConversationSelector::Direct { user_a, user_b } => (
            "group_id IS NULL AND ((sender_id = $1 AND receiver_id = $2) \
             OR (sender_id = $2 AND receiver_id = $1))",
            vec![Uuid::from(user_a), Uuid::from(user_b)],
        ),
        ConversationSelector::Group { group_id } => ("group_id = $1", vec![Uuid::from(group_id)]),
    }
}

#[derive(Debug, FromRow)]
struct GroupRow {
    id: Uuid,
    name: String,
    members: Vec<Uuid>,
    updated_at: DateTime<Utc>,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Group {
            id: GroupId::from(row.id),
            name: row.name,
            members: row.members.into_iter().map(UserId::from).collect(),
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PgGroupRepository {
    pool: PgPool,
}

impl PgGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepository for PgGroupRepository {
    async fn find_by_id(&self, id: GroupId) -> Result<Option<Group>, RepositoryError> {
        let row = sqlx::query_as::<_, GroupRow>(
            r#"SELECT id, name, members, updated_at FROM groups WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Group::from))
    }

    async fn touch(&self, id: GroupId, at: Timestamp) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE groups SET updated_at = GREATEST(updated_at, $2) WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    avatar_url: Option<String>,
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_profile(&self, id: UserId) -> Result<Option<UserProfile>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"SELECT id, username, avatar_url FROM users WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(|row| UserProfile {
            id: UserId::from(row.id),
            username: Some(row.username),
            avatar_url: row.avatar_url,
        }))
    }
}

/// PostgreSQL 存储集合
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub message_repository: Arc<PgMessageRepository>,
    pub group_repository: Arc<PgGroupRepository>,
    pub user_directory: Arc<PgUserDirectory>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            group_repository: Arc::new(PgGroupRepository::new(pool.clone())),
            user_directory: Arc::new(PgUserDirectory::new(pool.clone())),
            pool,
        }
    }

    pub fn storage(&self) -> Storage {
        Storage {
            messages: self.message_repository.clone(),
            groups: self.group_repository.clone(),
            users: self.user_directory.clone(),
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
