use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use validator::Validate;

use application::{
    GroupRepository, HistoryPage, HistoryQuery, MessageRecord, SendMessageRequest, SendOutcome,
};
use domain::{ConversationSelector, DomainError, GroupId, MessageTarget, MessageType, UserId};

use crate::{auth::AuthUser, error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    receiver_id: Option<Uuid>,
    group_id: Option<Uuid>,
    #[validate(length(min = 1, max = 4000))]
    body: String,
    message_type: Option<MessageType>,
}

impl SendMessagePayload {
    fn target(&self) -> Result<MessageTarget, DomainError> {
        match (self.receiver_id, self.group_id) {
            (Some(receiver_id), None) => Ok(MessageTarget::Direct {
                receiver_id: UserId::from(receiver_id),
            }),
            (None, Some(group_id)) => Ok(MessageTarget::Group {
                group_id: GroupId::from(group_id),
            }),
            _ => Err(DomainError::invalid_argument(
                "target",
                "exactly one of receiverId and groupId is required",
            )),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SendMessageResponse {
    Created { message: MessageRecord },
    Duplicate { duplicate: bool },
}

#[derive(Debug, Default, Deserialize, Validate)]
struct HistoryParams {
    #[validate(range(min = 1))]
    page: Option<u32>,
    #[validate(range(min = 1))]
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct MarkReadResponse {
    updated: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceResponse {
    online_users: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/messages", post(send_message))
        .route(
            "/conversations/{peer_id}/messages",
            get(conversation_history),
        )
        .route("/conversations/{peer_id}/read", post(mark_conversation_read))
        .route("/groups/{group_id}/messages", get(group_history))
        .route("/presence", get(online_users))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(sender_id): AuthUser,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<SendMessageResponse>), ApiError> {
    payload.validate()?;
    let target = payload.target()?;

    let outcome = state
        .services
        .delivery_router
        .send_message(SendMessageRequest {
            sender_id,
            target,
            body: payload.body,
            message_type: payload.message_type.unwrap_or_default(),
        })
        .await?;

    Ok(match outcome {
        SendOutcome::Created(message) => (
            StatusCode::CREATED,
            Json(SendMessageResponse::Created { message }),
        ),
        SendOutcome::Duplicate => (
            StatusCode::OK,
            Json(SendMessageResponse::Duplicate { duplicate: true }),
        ),
    })
}

async fn conversation_history(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Path(peer_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, ApiError> {
    params.validate()?;
    let page = state
        .services
        .history_reader
        .fetch(HistoryQuery {
            requester,
            selector: ConversationSelector::Direct {
                user_a: requester,
                user_b: UserId::from(peer_id),
            },
            page: params.page,
            limit: params.limit,
        })
        .await?;

    Ok(Json(page))
}

async fn group_history(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Path(group_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, ApiError> {
    params.validate()?;
    let group_id = GroupId::from(group_id);

    let group = state
        .services
        .groups
        .find_by_id(group_id)
        .await?
        .ok_or(DomainError::GroupNotFound)?;
    if !group.is_member(requester) {
        return Err(DomainError::NotGroupMember.into());
    }

    let page = state
        .services
        .history_reader
        .fetch(HistoryQuery {
            requester,
            selector: ConversationSelector::Group { group_id },
            page: params.page,
            limit: params.limit,
        })
        .await?;

    Ok(Json(page))
}

/// 请求方是接收者，`peer_id` 是原始发送者
async fn mark_conversation_read(
    State(state): State<AppState>,
    AuthUser(receiver_id): AuthUser,
    Path(peer_id): Path<Uuid>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated = state
        .services
        .status_tracker
        .mark_conversation_read(UserId::from(peer_id), receiver_id)
        .await?;

    Ok(Json(MarkReadResponse { updated }))
}

async fn online_users(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        online_users: state.services.presence.online_users(),
    })
}

/// 浏览器无法给 WebSocket 设置请求头，所以也接受 `?token=`
async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = match query.token.as_deref() {
        Some(token) => state.jwt_service.verify_token(token)?,
        None => state.jwt_service.extract_user_from_headers(&headers)?,
    };

    Ok(ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state, user_id).run()))
}
