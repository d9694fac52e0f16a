use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageTarget};
use crate::value_objects::{GroupId, UserId};

/// 历史查询的会话选择器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConversationSelector {
    /// 两个用户之间的单聊，不区分发送方向
    #[serde(rename_all = "camelCase")]
    Direct { user_a: UserId, user_b: UserId },
    #[serde(rename_all = "camelCase")]
    Group { group_id: GroupId },
}

impl ConversationSelector {
    pub fn matches(&self, message: &Message) -> bool {
        match (self, &message.target) {
            (
                ConversationSelector::Direct { user_a, user_b },
                MessageTarget::Direct { receiver_id },
            ) => {
                (message.sender_id == *user_a && receiver_id == user_b)
                    || (message.sender_id == *user_b && receiver_id == user_a)
            }
            (ConversationSelector::Group { group_id }, MessageTarget::Group { group_id: target }) => {
                group_id == target
            }
            _ => false,
        }
    }

    /// 单聊中除 `me` 以外的另一方
    pub fn peer_of(&self, me: UserId) -> Option<UserId> {
        match self {
            ConversationSelector::Direct { user_a, user_b } if *user_a == me => Some(*user_b),
            ConversationSelector::Direct { user_a, user_b } if *user_b == me => Some(*user_a),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBody, MessageType};
    use crate::value_objects::MessageId;
    use chrono::Utc;
    use uuid::Uuid;

    fn direct(sender: UserId, receiver: UserId) -> Message {
        Message::new(
            MessageId::generate(),
            sender,
            MessageTarget::Direct { receiver_id: receiver },
            MessageBody::parse("hello").unwrap(),
            MessageType::Text,
            Utc::now(),
        )
    }

    #[test]
    fn direct_selector_matches_both_directions_only() {
        let a = UserId::from(Uuid::new_v4());
        let b = UserId::from(Uuid::new_v4());
        let c = UserId::from(Uuid::new_v4());
        let selector = ConversationSelector::Direct { user_a: a, user_b: b };

        assert!(selector.matches(&direct(a, b)));
        assert!(selector.matches(&direct(b, a)));
        assert!(!selector.matches(&direct(a, c)));
        assert_eq!(selector.peer_of(a), Some(b));
        assert_eq!(selector.peer_of(c), None);
    }
}
