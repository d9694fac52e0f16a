use serde::{Deserialize, Serialize};

use crate::value_objects::{GroupId, Timestamp, UserId};

/// 群组的只读投影：投递只关心成员列表和最近活跃时间。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<UserId>,
    pub updated_at: Timestamp,
}

impl Group {
    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    /// 除 `user_id` 外的去重成员
    pub fn members_except(&self, user_id: UserId) -> Vec<UserId> {
        let mut members: Vec<UserId> = Vec::with_capacity(self.members.len());
        for member in &self.members {
            if *member != user_id && !members.contains(member) {
                members.push(*member);
            }
        }
        members
    }
}
