//! Integration tests for the retention purge.
//!
//! Validates:
//! - Terminal actions older than the window are deleted with their records
//! - Recent and non-terminal actions remain untouched
//! - Sent messages survive the purge

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use outreach_queue::models::action::{ActionStatus, NewAction};
use outreach_queue::models::validation::RejectionCategory;
use outreach_queue::persistence::db::fmt_ts;
use outreach_queue::persistence::message_repo::MessageRepo;
use outreach_queue::persistence::retention;

use super::test_helpers::{
    add_prospect, outbound_services, test_config, RecordingTransport, TransportMode,
};

async fn backdate(services: &outreach_queue::app::Services, id: i64, days: i64) {
    sqlx::query("UPDATE queued_action SET completed_at = ?1 WHERE id = ?2")
        .bind(fmt_ts(Utc::now() - Duration::days(days)))
        .bind(id)
        .execute(services.db.as_ref())
        .await
        .expect("backdate");
}

#[tokio::test]
async fn purge_removes_only_expired_terminal_actions() {
    let transport = RecordingTransport::new(TransportMode::Sequential);
    let services = outbound_services(test_config(""), transport).await;
    let prospect = add_prospect(&services, "Ada").await;

    let old_success = services
        .store
        .enqueue(&NewAction::new("send_followup_a1", 1, Some(prospect), json!({})))
        .await
        .expect("enqueue");
    let old_rejected = services
        .store
        .enqueue(&NewAction::new("send_first_contact", 1, Some(prospect), json!({})))
        .await
        .expect("enqueue");
    services.dispatcher.run_once().await.expect("pass");
    services
        .validation
        .reject(old_rejected, "rev", "off topic", RejectionCategory::Irrelevant)
        .await
        .expect("reject");

    let recent_success = services
        .store
        .enqueue(&NewAction::new("send_followup_a2", 1, Some(prospect), json!({})))
        .await
        .expect("enqueue");
    services.dispatcher.run_once().await.expect("pass");

    let still_pending = services
        .store
        .enqueue(
            &NewAction::new("send_followup_b", 1, Some(prospect), json!({}))
                .scheduled_at(Utc::now() + Duration::days(60)),
        )
        .await
        .expect("enqueue");

    backdate(&services, old_success, 45).await;
    backdate(&services, old_rejected, 31).await;
    backdate(&services, recent_success, 5).await;

    let purged = retention::purge(&services.db, 30).await.expect("purge");
    assert_eq!(purged, 2);

    assert!(services.store.get_by_id(old_success).await.expect("get").is_none());
    assert!(services.store.get_by_id(old_rejected).await.expect("get").is_none());
    assert!(services
        .validation
        .record(old_rejected)
        .await
        .expect("record")
        .is_none());
    assert_eq!(
        services.store.require(recent_success).await.expect("action").status,
        ActionStatus::Success
    );
    assert_eq!(
        services.store.require(still_pending).await.expect("action").status,
        ActionStatus::Pending
    );

    assert_eq!(
        MessageRepo::new(Arc::clone(&services.db))
            .count()
            .await
            .expect("count"),
        2
    );
}
