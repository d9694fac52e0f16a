use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 随新消息事件一起下发的发送者资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// 目录中查不到资料时的最小投影
    pub fn anonymous(id: UserId) -> Self {
        Self {
            id,
            username: None,
            avatar_url: None,
        }
    }
}
