use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::{DomainError, Group, GroupId, MessageStatus, RepositoryError, UserProfile};
use uuid::Uuid;

use super::test_support::{direct, drain_events, to_group, user, Harness};
use crate::dto::SendOutcome;
use crate::error::ApplicationError;
use crate::events::ServerEvent;
use crate::repository::{
    GroupRepository, MessageRepository, MockGroupRepository, MockMessageRepository,
};

fn created(outcome: SendOutcome) -> crate::dto::MessageRecord {
    match outcome {
        SendOutcome::Created(record) => record,
        SendOutcome::Duplicate => panic!("expected a new message"),
    }
}

#[tokio::test]
async fn test_direct_message_to_offline_receiver_stays_sent() {
    let harness = Harness::new();
    let router = harness.router();
    let (sender, receiver) = (user(), user());

    let record = created(router.send_message(direct(sender, receiver, "hi")).await.unwrap());
    harness.tasks.drain().await;

    assert_eq!(record.status, MessageStatus::Sent);
    assert_eq!(record.receiver_id, Some(receiver));
    assert!(record.group_id.is_none());
    let stored = harness.messages.find_by_id(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_direct_message_to_online_receiver_is_delivered_and_pushed() {
    let harness = Harness::new();
    let router = harness.router();
    let (sender, receiver) = (user(), user());
    harness
        .users
        .insert(UserProfile {
            id: sender,
            username: Some("alice".to_string()),
            avatar_url: None,
        })
        .await;
    let mut receiver_rx = harness.go_online(receiver);

    let record = created(router.send_message(direct(sender, receiver, "hi")).await.unwrap());
    harness.tasks.drain().await;

    assert_eq!(record.status, MessageStatus::Delivered);
    let events = drain_events(&mut receiver_rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        ServerEvent::ReceiveMessage(payload) => {
            assert_eq!(payload.message.id, record.id);
            assert_eq!(payload.sender.username.as_deref(), Some("alice"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_sender_profile_falls_back_to_id_only() {
    let harness = Harness::new();
    let router = harness.router();
    let (sender, receiver) = (user(), user());
    let mut receiver_rx = harness.go_online(receiver);

    router.send_message(direct(sender, receiver, "hi")).await.unwrap();
    harness.tasks.drain().await;

    match drain_events(&mut receiver_rx).pop() {
        Some(ServerEvent::ReceiveMessage(payload)) => {
            assert_eq!(payload.sender, UserProfile::anonymous(sender));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_identical_send_within_window_is_collapsed() {
    let harness = Harness::new();
    let router = harness.router();
    let (sender, receiver) = (user(), user());

    created(router.send_message(direct(sender, receiver, "hi")).await.unwrap());
    harness.clock.advance(Duration::from_millis(2_500));
    let second = router.send_message(direct(sender, receiver, "hi")).await.unwrap();
    assert_eq!(second, SendOutcome::Duplicate);
    assert_eq!(harness.messages.len().await, 1);

    harness.clock.advance(Duration::from_millis(3_000));
    created(router.send_message(direct(sender, receiver, "hi")).await.unwrap());
    assert_eq!(harness.messages.len().await, 2);
}

#[tokio::test]
async fn test_group_send_marks_online_members_once() {
    let harness = Harness::new();
    let router = harness.router();
    let (sender, a, b, c, offline) = (user(), user(), user(), user(), user());
    let group_id = harness.group_with(&[sender, a, b, c, offline, a]).await;
    let _sender_rx = harness.go_online(sender);
    let mut receivers = vec![harness.go_online(a), harness.go_online(b), harness.go_online(c)];

    let record = created(router.send_message(to_group(sender, group_id, "standup")).await.unwrap());
    harness.tasks.drain().await;

    assert_eq!(record.status, MessageStatus::Delivered);
    let mut delivered: Vec<_> = record.delivered_to.iter().map(|r| r.user_id).collect();
    delivered.sort();
    let mut expected = vec![a, b, c];
    expected.sort();
    assert_eq!(delivered, expected);

    for rx in receivers.iter_mut() {
        let events = drain_events(rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::ReceiveGroupMessage(p) if p.message.id == record.id));
    }

    let group = harness.groups.find_by_id(group_id).await.unwrap().unwrap();
    assert_eq!(group.updated_at, record.created_at);
}

#[tokio::test]
async fn test_group_send_with_nobody_online_stays_sent() {
    let harness = Harness::new();
    let router = harness.router();
    let (sender, member) = (user(), user());
    let group_id = harness.group_with(&[sender, member]).await;

    let record = created(router.send_message(to_group(sender, group_id, "anyone?")).await.unwrap());

    assert_eq!(record.status, MessageStatus::Sent);
    assert!(record.delivered_to.is_empty());
}

#[tokio::test]
async fn test_validation_failures_do_not_record_suppression_key() {
    let harness = Harness::new();
    let router = harness.router();
    let (sender, outsider) = (user(), user());
    let group_id = harness.group_with(&[sender]).await;

    let err = router.send_message(direct(sender, user(), "   ")).await.unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::InvalidArgument { .. })));

    let err = router
        .send_message(to_group(outsider, group_id, "let me in"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::NotGroupMember)));

    let err = router
        .send_message(to_group(sender, GroupId::from(Uuid::new_v4()), "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::GroupNotFound)));

    assert!(harness.suppressor.is_empty());
    assert!(harness.messages.is_empty().await);
}

#[tokio::test]
async fn test_persist_failure_is_returned_and_nothing_is_pushed() {
    let harness = Harness::new();
    let mut repository = MockMessageRepository::new();
    repository
        .expect_create()
        .times(1)
        .returning(|_| Err(RepositoryError::storage("connection reset")));
    let router = harness.router_with(
        Arc::new(repository),
        harness.groups.clone(),
        harness.users.clone(),
    );
    let (sender, receiver) = (user(), user());
    let mut receiver_rx = harness.go_online(receiver);

    let err = router.send_message(direct(sender, receiver, "hi")).await.unwrap_err();
    harness.tasks.drain().await;

    assert!(matches!(err, ApplicationError::Repository(RepositoryError::Storage { .. })));
    assert!(drain_events(&mut receiver_rx).is_empty());
}

#[tokio::test]
async fn test_retry_after_persist_failure_is_not_collapsed() {
    let harness = Harness::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut repository = MockMessageRepository::new();
    let counter = attempts.clone();
    repository.expect_create().times(2).returning(move |message| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(RepositoryError::storage("connection reset"))
        } else {
            Ok(message)
        }
    });
    let router = harness.router_with(
        Arc::new(repository),
        harness.groups.clone(),
        harness.users.clone(),
    );
    let (sender, receiver) = (user(), user());

    assert!(router.send_message(direct(sender, receiver, "hi")).await.is_err());
    assert!(harness.suppressor.is_empty());

    harness.clock.advance(Duration::from_millis(500));
    let retry = router.send_message(direct(sender, receiver, "hi")).await.unwrap();
    harness.tasks.drain().await;

    assert!(matches!(retry, SendOutcome::Created(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_group_touch_failure_is_swallowed() {
    let harness = Harness::new();
    let (sender, member) = (user(), user());
    let group = Group {
        id: GroupId::from(Uuid::new_v4()),
        name: "ops".to_string(),
        members: vec![sender, member],
        updated_at: Utc::now(),
    };
    let group_id = group.id;

    let mut groups = MockGroupRepository::new();
    groups
        .expect_find_by_id()
        .returning(move |_| Ok(Some(group.clone())));
    groups
        .expect_touch()
        .times(1)
        .returning(|_, _| Err(RepositoryError::storage("timeout")));
    let router = harness.router_with(harness.messages.clone(), Arc::new(groups), harness.users.clone());
    let mut member_rx = harness.go_online(member);

    let record = created(router.send_message(to_group(sender, group_id, "deploy done")).await.unwrap());
    harness.tasks.drain().await;

    assert_eq!(record.status, MessageStatus::Delivered);
    assert_eq!(harness.tasks.failed_count(), 1);
    assert_eq!(drain_events(&mut member_rx).len(), 1);
    assert_eq!(harness.messages.len().await, 1);
}
