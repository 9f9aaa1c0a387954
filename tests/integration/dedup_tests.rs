//! Integration tests for delivery deduplication.
//!
//! Validates:
//! - A repeated external message id is stored once and still succeeds
//! - A transport-reported duplicate is a success without a stored record
//! - Deliveries without an external id are all kept

use std::sync::Arc;

use serde_json::json;

use outreach_queue::models::action::{ActionStatus, NewAction};
use outreach_queue::models::message::SentMessage;
use outreach_queue::persistence::message_repo::{MessageRepo, Recorded};

use super::test_helpers::{
    add_prospect, outbound_services, test_config, RecordingTransport, TransportMode,
};

#[tokio::test]
async fn same_external_id_is_stored_once() {
    let transport = RecordingTransport::new(TransportMode::FixedId("msg-777".into()));
    let services = outbound_services(test_config(""), Arc::clone(&transport)).await;
    let prospect = add_prospect(&services, "Guido").await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        ids.push(
            services
                .store
                .enqueue(&NewAction::new("send_followup_b", 1, Some(prospect), json!({})))
                .await
                .expect("enqueue"),
        );
    }

    let report = services.dispatcher.run_once().await.expect("pass");
    assert_eq!(report.succeeded, 2);
    assert_eq!(transport.call_count(), 2);

    let messages = MessageRepo::new(Arc::clone(&services.db));
    assert_eq!(messages.count().await.expect("count"), 1);
    let stored = messages
        .get_by_external_id("msg-777")
        .await
        .expect("lookup")
        .expect("stored");
    assert_eq!(stored.action_id, ids[0]);

    let second = services.store.require(ids[1]).await.expect("action");
    assert_eq!(second.status, ActionStatus::Success);
    assert_eq!(second.result.expect("result")["duplicate"], true);
}

#[tokio::test]
async fn transport_reported_duplicate_is_success() {
    let transport = RecordingTransport::new(TransportMode::ReportDuplicate);
    let services = outbound_services(test_config(""), Arc::clone(&transport)).await;
    let prospect = add_prospect(&services, "Bjarne").await;

    let id = services
        .store
        .enqueue(&NewAction::new("send_followup_a1", 1, Some(prospect), json!({})))
        .await
        .expect("enqueue");

    let report = services.dispatcher.run_once().await.expect("pass");
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.retried, 0);

    let action = services.store.require(id).await.expect("action");
    assert_eq!(action.status, ActionStatus::Success);
    assert_eq!(
        MessageRepo::new(Arc::clone(&services.db))
            .count()
            .await
            .expect("count"),
        0
    );
}

#[tokio::test]
async fn messages_without_external_id_are_not_deduplicated() {
    let db = Arc::new(outreach_queue::persistence::db::connect_memory().await.expect("db"));
    let repo = MessageRepo::new(db);

    for _ in 0..2 {
        let outcome = repo
            .record(&SentMessage::new(1, 1, Some(1), None, "hi".into()))
            .await
            .expect("record");
        assert_eq!(outcome, Recorded::New);
    }
    assert_eq!(repo.count().await.expect("count"), 2);
}
