//! Integration tests for the validation gate.
//!
//! Validates:
//! - Validation-required drafts are held, not sent
//! - Approval delivers the (optionally edited) draft exactly once
//! - Rejection is terminal and counts against the prospect
//! - The rejection threshold closes the prospect and cancels its queue

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use outreach_queue::models::action::{ActionStatus, NewAction};
use outreach_queue::models::validation::{RejectionCategory, ValidationStatus};
use outreach_queue::persistence::prospect_repo::ProspectRepo;
use outreach_queue::persistence::validation_repo::ListOrder;
use outreach_queue::validation::{ApprovalOutcome, CLOSED_BY_REJECTIONS};
use outreach_queue::AppError;

use super::test_helpers::{
    add_prospect, outbound_services, test_config, RecordingTransport, TransportMode,
};

#[tokio::test]
async fn validated_draft_is_held_until_approved() {
    let transport = RecordingTransport::new(TransportMode::Sequential);
    let services = outbound_services(test_config(""), Arc::clone(&transport)).await;
    let prospect = add_prospect(&services, "Margaret").await;

    let id = services
        .store
        .enqueue(&NewAction::new("send_first_contact", 1, Some(prospect), json!({})))
        .await
        .expect("enqueue");

    let report = services.dispatcher.run_once().await.expect("pass");
    assert_eq!(report.held, 1);
    assert_eq!(transport.call_count(), 0);

    let action = services.store.require(id).await.expect("action");
    assert_eq!(action.status, ActionStatus::AwaitingValidation);

    let pending = services
        .validation
        .list_pending(None, ListOrder::OldestFirst, 10)
        .await
        .expect("list");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0.id, id);
    assert_eq!(pending[0].1.draft, "Hello Margaret, re send_first_contact");

    let outcome = services
        .validation
        .approve(id, "reviewer@example.com", Some("good"), None)
        .await
        .expect("approve");
    assert!(matches!(outcome, ApprovalOutcome::Delivered { .. }));
    assert_eq!(transport.call_count(), 1);
    assert_eq!(
        transport.calls()[0].content,
        "Hello Margaret, re send_first_contact"
    );

    let action = services.store.require(id).await.expect("action");
    assert_eq!(action.status, ActionStatus::Success);
    let record = services
        .validation
        .record(id)
        .await
        .expect("record")
        .expect("exists");
    assert_eq!(record.status, ValidationStatus::Approved);
    assert_eq!(record.validated_by.as_deref(), Some("reviewer@example.com"));
    assert_eq!(record.feedback.as_deref(), Some("good"));
}

#[tokio::test]
async fn approval_sends_reviewer_edit() {
    let transport = RecordingTransport::new(TransportMode::Sequential);
    let services = outbound_services(test_config(""), Arc::clone(&transport)).await;
    let prospect = add_prospect(&services, "Frances").await;

    let id = services
        .store
        .enqueue(&NewAction::new(
            "send_reply",
            1,
            Some(prospect),
            json!({ "content": "Thanks for the note!" }),
        ))
        .await
        .expect("enqueue");
    services.dispatcher.run_once().await.expect("pass");

    services
        .validation
        .approve(id, "rev", None, Some("Thanks, talk Tuesday?"))
        .await
        .expect("approve");

    assert_eq!(transport.calls()[0].content, "Thanks, talk Tuesday?");
    let record = services
        .validation
        .record(id)
        .await
        .expect("record")
        .expect("exists");
    assert_eq!(record.draft, "Thanks for the note!");
    assert_eq!(record.content_to_send(), "Thanks, talk Tuesday?");
}

#[tokio::test]
async fn second_decision_is_already_claimed() {
    let transport = RecordingTransport::new(TransportMode::Sequential);
    let services = outbound_services(test_config(""), Arc::clone(&transport)).await;
    let prospect = add_prospect(&services, "Donald").await;

    let id = services
        .store
        .enqueue(&NewAction::new("send_first_contact", 1, Some(prospect), json!({})))
        .await
        .expect("enqueue");
    services.dispatcher.run_once().await.expect("pass");

    services
        .validation
        .approve(id, "rev-a", None, None)
        .await
        .expect("first approve");

    let again = services
        .validation
        .approve(id, "rev-b", None, None)
        .await
        .expect_err("second approve");
    assert!(matches!(again, AppError::AlreadyClaimed(_)));

    let reject = services
        .validation
        .reject(id, "rev-b", "too late", RejectionCategory::Timing)
        .await
        .expect_err("reject after approve");
    assert!(matches!(reject, AppError::AlreadyClaimed(_)));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn rejection_requires_reason_and_is_terminal() {
    let transport = RecordingTransport::new(TransportMode::Sequential);
    let services = outbound_services(test_config(""), Arc::clone(&transport)).await;
    let prospect = add_prospect(&services, "Barbara").await;

    let id = services
        .store
        .enqueue(&NewAction::new("send_first_contact", 1, Some(prospect), json!({})))
        .await
        .expect("enqueue");
    services.dispatcher.run_once().await.expect("pass");

    let err = services
        .validation
        .reject(id, "rev", "   ", RejectionCategory::Tone)
        .await
        .expect_err("empty reason");
    assert!(matches!(err, AppError::InvalidPayload(_)));

    let outcome = services
        .validation
        .reject(id, "rev", "too pushy", RejectionCategory::Tone)
        .await
        .expect("reject");
    assert_eq!(outcome.rejection_count, Some(1));
    assert!(!outcome.prospect_closed);

    let action = services.store.require(id).await.expect("action");
    assert_eq!(action.status, ActionStatus::Failed);
    assert!(action
        .error
        .as_deref()
        .is_some_and(|e| e.contains("too pushy")));

    let record = services
        .validation
        .record(id)
        .await
        .expect("record")
        .expect("exists");
    assert_eq!(record.status, ValidationStatus::Rejected);
    assert_eq!(record.rejection_reason.as_deref(), Some("too pushy"));
    assert_eq!(record.rejection_category, Some(RejectionCategory::Tone));

    let report = services
        .dispatcher
        .run_at(Utc::now() + Duration::days(2))
        .await
        .expect("pass");
    assert_eq!(report.fetched, 0, "rejected drafts are never retried");
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn third_rejection_closes_prospect_and_cancels_queue() {
    let transport = RecordingTransport::new(TransportMode::Sequential);
    let services = outbound_services(test_config(""), Arc::clone(&transport)).await;
    let prospect = add_prospect(&services, "Dennis").await;

    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(
            services
                .store
                .enqueue(&NewAction::new("send_first_contact", 1, Some(prospect), json!({})))
                .await
                .expect("enqueue"),
        );
    }
    let queued_later = services
        .store
        .enqueue(
            &NewAction::new("send_followup_a1", 1, Some(prospect), json!({}))
                .scheduled_at(Utc::now() + Duration::days(3)),
        )
        .await
        .expect("enqueue");

    let report = services.dispatcher.run_once().await.expect("pass");
    assert_eq!(report.held, 3);

    let mut last = None;
    for (n, id) in held.iter().enumerate() {
        last = Some(
            services
                .validation
                .reject(*id, "rev", &format!("attempt {n} off"), RejectionCategory::Content)
                .await
                .expect("reject"),
        );
    }
    let last = last.expect("three rejections");
    assert_eq!(last.rejection_count, Some(3));
    assert!(last.prospect_closed);
    assert_eq!(last.cancelled, 1);

    let record = ProspectRepo::new(Arc::clone(&services.db))
        .require(prospect)
        .await
        .expect("prospect");
    assert!(record.is_closed());
    assert_eq!(record.rejection_count, 3);
    assert!(record
        .closed_reason
        .as_deref()
        .is_some_and(|r| r.starts_with(CLOSED_BY_REJECTIONS)));

    assert_eq!(
        services.store.require(queued_later).await.expect("action").status,
        ActionStatus::Cancelled
    );

    let err = services
        .store
        .enqueue(&NewAction::new("send_followup_b", 1, Some(prospect), json!({})))
        .await
        .expect_err("closed prospect");
    assert!(matches!(err, AppError::ProspectClosed(_)));
}

#[tokio::test]
async fn pending_listing_honours_order_and_type_filter() {
    let transport = RecordingTransport::new(TransportMode::Sequential);
    let services = outbound_services(test_config(""), transport).await;
    let prospect = add_prospect(&services, "Tony").await;

    let first = services
        .store
        .enqueue(&NewAction::new("send_first_contact", 1, Some(prospect), json!({})))
        .await
        .expect("enqueue");
    services.dispatcher.run_once().await.expect("pass");
    let reply = services
        .store
        .enqueue(&NewAction::new(
            "send_reply",
            1,
            Some(prospect),
            json!({ "content": "Sure, happy to chat" }),
        ))
        .await
        .expect("enqueue");
    services.dispatcher.run_once().await.expect("pass");

    let newest = services
        .validation
        .list_pending(None, ListOrder::NewestFirst, 10)
        .await
        .expect("list");
    let ids: Vec<i64> = newest.iter().map(|(a, _)| a.id).collect();
    assert_eq!(ids, vec![reply, first]);

    let replies = services
        .validation
        .list_pending(Some("send_reply"), ListOrder::OldestFirst, 10)
        .await
        .expect("list");
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].1.draft, "Sure, happy to chat");
}

#[tokio::test]
async fn failed_delivery_after_approval_is_retried_and_held_again() {
    let transport = RecordingTransport::new(TransportMode::Unreachable);
    let services = outbound_services(test_config(""), transport).await;
    let prospect = add_prospect(&services, "Leslie").await;

    let id = services
        .store
        .enqueue(&NewAction::new("send_first_contact", 1, Some(prospect), json!({})))
        .await
        .expect("enqueue");
    services.dispatcher.run_once().await.expect("pass");

    let outcome = services
        .validation
        .approve(id, "rev", None, None)
        .await
        .expect("approve");
    assert!(matches!(
        outcome,
        ApprovalOutcome::DeliveryFailed { retrying: true, .. }
    ));

    let report = services
        .dispatcher
        .run_at(Utc::now() + Duration::hours(2))
        .await
        .expect("pass");
    assert_eq!(report.held, 1);

    let record = services
        .validation
        .record(id)
        .await
        .expect("record")
        .expect("exists");
    assert_eq!(record.status, ValidationStatus::AwaitingValidation);
    assert!(record.validated_by.is_none());
}
