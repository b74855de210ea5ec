mod common;

use std::time::Duration;

use common::Harness;
use invitegate::error::Error;
use invitegate::model::{NewInviteRequest, RequestId, RequestStatus, WorkMessage};
use invitegate::store::RequestStore;

#[tokio::test]
async fn submit_stores_one_record_and_schedules_one_item() {
    let h = Harness::new();
    let request = h
        .intake
        .submit(NewInviteRequest::new("u1").correlation_id("c-1"))
        .await
        .unwrap();

    assert_eq!(request.status, RequestStatus::Queued);
    assert_eq!(request.attempts, 0);
    assert!(request.invite_link.is_none());
    assert!(!request.joined);

    let stored = h.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored, request);
    assert_eq!(h.store.request_count(), 1);

    let scheduled = h.queue.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].message.request_id, request.id);
    assert_eq!(scheduled[0].delay, Duration::ZERO);

    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn submissions_are_independent() {
    let h = Harness::new();
    let a = h.intake.submit(NewInviteRequest::new("u1")).await.unwrap();
    let b = h.intake.submit(NewInviteRequest::new("u1")).await.unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(h.store.request_count(), 2);
    assert_eq!(h.queue.scheduled().len(), 2);
}

#[tokio::test]
async fn blank_user_is_rejected_without_side_effects() {
    let h = Harness::new();
    let err = h
        .intake
        .submit(NewInviteRequest::new("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.store.request_count(), 0);
    assert!(h.queue.scheduled().is_empty());
}

#[tokio::test]
async fn requeue_schedules_a_non_terminal_request() {
    let h = Harness::new();
    let request = h.intake.submit(NewInviteRequest::new("u1")).await.unwrap();
    h.queue.drain();

    let again = h.intake.requeue(request.id).await.unwrap();
    assert_eq!(again.id, request.id);
    let scheduled = h.queue.drain();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].message.request_id, request.id);
}

#[tokio::test]
async fn requeue_refuses_terminal_and_unknown_requests() {
    let h = Harness::new();
    let request = h.intake.submit(NewInviteRequest::new("u1")).await.unwrap();
    h.queue.drain();
    h.worker
        .handle(WorkMessage {
            request_id: request.id,
        })
        .await;

    let err = h.intake.requeue(request.id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: RequestStatus::Done,
            ..
        }
    ));

    let err = h.intake.requeue(RequestId::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(h.queue.scheduled().is_empty());
}
