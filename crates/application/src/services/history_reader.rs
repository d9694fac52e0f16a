//! 历史消息查询
//!
//! 计数与分页查询并发执行，各自受单次查询预算约束，整体再受一个总超时约束。
//! 超时不会报错，而是返回空页；调用方应把空页理解为"稍后重试"。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use config::HistoryConfig;
use domain::{ConversationSelector, Message, MessageId, MessageStatus, RepositoryError, UserId};

use crate::{
    background::BackgroundTasks,
    dto::{HistoryPage, MessageRecord, Pagination},
    error::ApplicationError,
    events::{ServerEvent, StatusUpdate},
    presence::PresenceRegistry,
    repository::MessageRepository,
};

#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub requester: UserId,
    pub selector: ConversationSelector,
    /// 从 1 开始；缺省为第一页
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub default_limit: u32,
    pub max_limit: u32,
    pub query_budget: Duration,
    pub overall_timeout: Duration,
}

impl From<&HistoryConfig> for HistorySettings {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            default_limit: config.default_limit,
            max_limit: config.max_limit,
            query_budget: config.query_budget(),
            overall_timeout: config.overall_timeout(),
        }
    }
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self::from(&HistoryConfig::default())
    }
}

pub struct HistoryReaderDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub presence: Arc<PresenceRegistry>,
    pub tasks: BackgroundTasks,
    pub settings: HistorySettings,
}

enum FetchFailure {
    TimedOut,
    Repository(RepositoryError),
}

pub struct HistoryReader {
    deps: HistoryReaderDependencies,
}

impl HistoryReader {
    pub fn new(deps: HistoryReaderDependencies) -> Self {
        Self { deps }
    }

    pub async fn fetch(&self, query: HistoryQuery) -> Result<HistoryPage, ApplicationError> {
        let settings = &self.deps.settings;
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(settings.default_limit)
            .clamp(1, settings.max_limit);
        let skip = u64::from(page - 1) * u64::from(limit);

        let repository = &self.deps.message_repository;
        let budget = settings.query_budget;
        let both = async {
            tokio::try_join!(
                bounded(budget, repository.count(query.selector)),
                bounded(budget, repository.find_page(query.selector, skip, limit)),
            )
        };

        let (total, mut messages) =
            match tokio::time::timeout(settings.overall_timeout, both).await {
                Ok(Ok(result)) => result,
                Ok(Err(FetchFailure::Repository(err))) => return Err(err.into()),
                Ok(Err(FetchFailure::TimedOut)) | Err(_) => {
                    tracing::warn!(
                        requester = %query.requester,
                        page,
                        limit,
                        "历史查询超时，返回空页"
                    );
                    return Ok(HistoryPage::empty(page, limit));
                }
            };

        // 存储按新到旧返回，页内翻转为旧到新
        messages.reverse();

        if let Some(peer) = query.selector.peer_of(query.requester) {
            self.spawn_mark_delivered(query.requester, peer, &messages);
        }

        let total_pages = total.div_ceil(u64::from(limit));
        Ok(HistoryPage {
            messages: messages.iter().map(MessageRecord::from).collect(),
            pagination: Pagination {
                page,
                limit,
                total_messages: total,
                total_pages,
                has_more: u64::from(page) < total_pages,
            },
        })
    }

    /// 读到即视为送达：把发给请求者、仍处于 sent 的消息推进到 delivered，并通知对方
    fn spawn_mark_delivered(&self, requester: UserId, peer: UserId, messages: &[Message]) {
        let pending: Vec<MessageId> = messages
            .iter()
            .filter(|message| {
                message.receiver_id() == Some(requester) && message.status == MessageStatus::Sent
            })
            .map(|message| message.id)
            .collect();
        if pending.is_empty() {
            return;
        }

        let repository = self.deps.message_repository.clone();
        let presence = self.deps.presence.clone();
        self.deps.tasks.spawn("history_mark_delivered", async move {
            let updated = repository.mark_delivered(pending).await?;
            tracing::debug!(
                requester = %requester,
                updated = updated.len(),
                "历史读取推进送达状态"
            );
            for message_id in updated {
                presence.notify(
                    peer,
                    ServerEvent::MessageStatusUpdate(StatusUpdate {
                        message_id,
                        status: MessageStatus::Delivered,
                    }),
                );
            }
            Ok(())
        });
    }
}

async fn bounded<T, F>(budget: Duration, query: F) -> Result<T, FetchFailure>
where
    F: Future<Output = Result<T, RepositoryError>>,
{
    match tokio::time::timeout(budget, query).await {
        Ok(result) => result.map_err(FetchFailure::Repository),
        Err(_) => Err(FetchFailure::TimedOut),
    }
}
