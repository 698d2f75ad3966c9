//! Webhook ingestion: signatures, dispatch, and duplicate absorption.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{
    buyer, charge_success_body, harness, purchase_request, sample_event, seed_event,
    sign_webhook,
};
use stagepass::audit::CollectingAuditEmitter;
use stagepass::store::Store;
use stagepass::types::{PaymentStatus, TransactionStatus};
use stagepass::webhook::WebhookProcessor;
use std::sync::Arc;

#[tokio::test]
async fn bad_signature_is_acknowledged_but_rejected() {
    let h = harness();
    let body = charge_success_body("ref-x", 1_000);

    let ack = h.webhooks.ingest(&body, Some("deadbeef")).await;
    assert!(!ack.success);
    assert!(!ack.handled);
    assert_eq!(ack.message.as_deref(), Some("Invalid signature"));

    let ack = h.webhooks.ingest(&body, None).await;
    assert!(!ack.success);
}

#[tokio::test]
async fn missing_secret_disables_ingestion() {
    let h = harness();
    let disabled = WebhookProcessor::new(
        Arc::clone(&h.engine),
        Arc::clone(&h.store) as Arc<dyn stagepass::store::Store>,
        Arc::new(CollectingAuditEmitter::new()) as Arc<dyn stagepass::audit::AuditEmitter>,
        None,
    );
    let body = charge_success_body("ref-x", 1_000);
    let signature = sign_webhook(&body);
    let ack = disabled.ingest(&body, Some(&signature)).await;
    assert!(!ack.success);
    assert_eq!(ack.message.as_deref(), Some("Invalid signature"));
}

#[tokio::test]
async fn charge_success_completes_and_duplicates_are_absorbed() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 4);
    seed_event(&h, &event).await;
    let actor = buyer();

    let outcome = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 2, Some("K1")))
        .await
        .unwrap();
    let reference = outcome.transaction.gateway.reference.clone();
    let body = charge_success_body(&reference, 10_000);
    let signature = sign_webhook(&body);

    // Deliver the same webhook three times.
    for _ in 0..3 {
        let ack = h.webhooks.ingest(&body, Some(&signature)).await;
        assert!(ack.success && ack.handled);
    }

    let txn = h
        .store
        .transaction(outcome.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Completed);

    let tickets = h
        .store
        .tickets_for_order(outcome.order.id)
        .await
        .unwrap();
    assert_eq!(tickets.len(), 2, "duplicates minted no extra tickets");

    let event_after = h.store.event(event.id).await.unwrap().unwrap();
    assert_eq!(event_after.tier(tier_id).unwrap().sold_count, 2);
}

#[tokio::test]
async fn charge_failed_fails_the_transaction() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 4);
    seed_event(&h, &event).await;
    let actor = buyer();

    let outcome = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 1, Some("K1")))
        .await
        .unwrap();
    let reference = outcome.transaction.gateway.reference.clone();
    let body = serde_json::json!({
        "event": "charge.failed",
        "data": {
            "reference": reference,
            "amount": 5_000,
            "gateway_response": "Insufficient funds",
        }
    })
    .to_string()
    .into_bytes();
    let signature = sign_webhook(&body);

    let ack = h.webhooks.ingest(&body, Some(&signature)).await;
    assert!(ack.success && ack.handled);

    let txn = h
        .store
        .transaction(outcome.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Failed);
    assert_eq!(txn.failure.unwrap().reason, "Insufficient funds");
    let order = h.store.order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn stale_charge_failed_after_completion_is_dropped() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 4);
    seed_event(&h, &event).await;
    let actor = buyer();

    let outcome = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 1, Some("K1")))
        .await
        .unwrap();
    let reference = outcome.transaction.gateway.reference.clone();

    let success = charge_success_body(&reference, 5_000);
    let success_sig = sign_webhook(&success);
    assert!(h.webhooks.ingest(&success, Some(&success_sig)).await.success);

    let failed = serde_json::json!({
        "event": "charge.failed",
        "data": { "reference": reference, "amount": 5_000 }
    })
    .to_string()
    .into_bytes();
    let failed_sig = sign_webhook(&failed);
    let ack = h.webhooks.ingest(&failed, Some(&failed_sig)).await;
    assert!(ack.success, "stale failure is acknowledged, not applied");

    let txn = h
        .store
        .transaction(outcome.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn audit_only_and_unknown_events() {
    let h = harness();

    let transfer = serde_json::json!({
        "event": "transfer.success",
        "data": { "reference": "tr_1", "amount": 9_000 }
    })
    .to_string()
    .into_bytes();
    let sig = sign_webhook(&transfer);
    let ack = h.webhooks.ingest(&transfer, Some(&sig)).await;
    assert!(ack.success && ack.handled);

    let unknown = serde_json::json!({
        "event": "subscription.create",
        "data": {}
    })
    .to_string()
    .into_bytes();
    let sig = sign_webhook(&unknown);
    let ack = h.webhooks.ingest(&unknown, Some(&sig)).await;
    assert!(ack.success);
    assert!(!ack.handled, "unknown events are acked but unhandled");
}

#[tokio::test]
async fn malformed_payload_is_acknowledged_with_system_error() {
    let h = harness();
    let body = b"not json at all".to_vec();
    let signature = sign_webhook(&body);
    let ack = h.webhooks.ingest(&body, Some(&signature)).await;
    assert!(!ack.success);
    assert!(!ack.handled);
    // The fault went to the audit stream, not the caller.
    let events = h.audit.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, stagepass::audit::AuditEvent::SystemError { .. })));
}
