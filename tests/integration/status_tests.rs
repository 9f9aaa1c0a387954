//! Integration tests for the status query and workflow lifecycle.

use std::sync::Arc;

use serde_json::json;

use outreach_queue::dispatcher::Workflow;
use outreach_queue::models::action::NewAction;

use super::test_helpers::{
    add_prospect, outbound_services, test_config, RecordingTransport, TransportMode,
};

#[tokio::test]
async fn status_reports_counts_and_quota_usage() {
    let transport = RecordingTransport::new(TransportMode::Sequential);
    let services = outbound_services(
        test_config("[quota.limits]\nsend_followup_ = 30\n"),
        transport,
    )
    .await;
    let prospect = add_prospect(&services, "Radia").await;

    for action_type in ["send_followup_a1", "send_followup_b", "send_first_contact"] {
        services
            .store
            .enqueue(&NewAction::new(action_type, 1, Some(prospect), json!({})))
            .await
            .expect("enqueue");
    }
    services.dispatcher.run_once().await.expect("pass");

    let report = services.status().await.expect("status");
    assert_eq!(report.counts["success"], 2);
    assert_eq!(report.counts["awaiting_validation"], 1);
    assert_eq!(report.counts["pending"], 0);
    assert_eq!(report.counts["cancelled"], 0);

    let followups = report
        .quotas
        .iter()
        .find(|q| q.bucket == "send_followup_")
        .expect("followup bucket");
    assert_eq!((followups.current, followups.limit, followups.remaining), (2, 30, 28));

    let first_contact = report
        .quotas
        .iter()
        .find(|q| q.bucket == "send_first_contact")
        .expect("first contact bucket");
    assert_eq!((first_contact.current, first_contact.limit), (0, 50));

    assert!(
        !report.quotas.iter().any(|q| q.bucket == "send_followup_a1"),
        "types covered by a prefix are reported under it"
    );
}

#[tokio::test]
async fn workflow_start_and_stop_are_idempotent() {
    let transport = RecordingTransport::new(TransportMode::Sequential);
    let services = outbound_services(test_config(""), transport).await;
    let workflow = Workflow::new(Arc::clone(&services.dispatcher));

    assert!(!workflow.is_running().await);
    assert!(workflow.start().await);
    assert!(!workflow.start().await);
    assert!(workflow.is_running().await);

    assert!(workflow.stop().await);
    assert!(!workflow.stop().await);
    assert!(!workflow.is_running().await);
}
