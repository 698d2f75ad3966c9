//! End-to-end engine scenarios over the in-memory store and mock gateway.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{buyer, charge_success_body, harness, purchase_request, sample_event, seed_event, sign_webhook};
use stagepass::error::EngineError;
use stagepass::store::Store;
use stagepass::gateway::{SubaccountShare, VerifiedPayment};
use stagepass::types::{Money, PaymentStatus, TicketStatus, TransactionStatus};
use std::collections::HashSet;
use std::sync::Arc;

/// Happy purchase: initiate, verify with a gateway-withheld platform share,
/// and observe the completed world.
#[tokio::test]
async fn happy_purchase_settles_counts_splits_and_tickets() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 4);
    seed_event(&h, &event).await;
    let actor = buyer();

    let outcome = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 2, Some("K1")))
        .await
        .unwrap();
    assert!(!outcome.is_idempotent);
    assert_eq!(outcome.transaction.status, TransactionStatus::Initiated);
    assert_eq!(outcome.transaction.amount, Money::from_minor(10_000));
    assert_eq!(outcome.order.payment_status, PaymentStatus::Pending);
    assert_eq!(outcome.order.total_amount, Money::from_minor(10_000));
    assert!(outcome.order.tickets.is_empty());
    assert!(outcome.payment_url.starts_with("https://checkout.mock/"));

    let reference = outcome.transaction.gateway.reference.clone();
    h.gateway.script_verify(
        reference.clone(),
        VerifiedPayment {
            subaccount: Some(SubaccountShare {
                code: "ACCT_org".to_string(),
                shared_amount: Money::from_minor(1_000),
            }),
            ..VerifiedPayment::success(Money::from_minor(10_000))
        },
    );

    let completed = h.engine.verify(&reference).await.unwrap();
    assert!(!completed.already_completed);
    assert_eq!(completed.transaction.status, TransactionStatus::Completed);
    assert_eq!(completed.order.payment_status, PaymentStatus::Completed);
    assert_eq!(completed.tickets.len(), 2);

    let splits = completed.transaction.splits.clone().unwrap();
    assert_eq!(splits.platform_amount, Money::from_minor(1_000));
    assert_eq!(splits.organizer_amount, Money::from_minor(9_000));

    let qr_codes: HashSet<&str> = completed
        .tickets
        .iter()
        .map(|t| t.qr_code.as_str())
        .collect();
    assert_eq!(qr_codes.len(), 2, "qr codes must be unique");

    let event_after = h.store.event(event.id).await.unwrap().unwrap();
    let tier = event_after.tier(tier_id).unwrap();
    assert_eq!(tier.sold_count, 2);
    assert_eq!(event_after.total_tickets_sold, 2);
    assert_eq!(event_after.total_revenue, Money::from_minor(10_000));
}

/// Five concurrent purchases under one idempotency key: one transaction,
/// five responses, one gateway call.
#[tokio::test]
async fn concurrent_initiates_with_one_key_collapse() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 10);
    seed_event(&h, &event).await;
    let actor = buyer();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = Arc::clone(&h.engine);
        let request = purchase_request(&actor, &event, tier_id, 2, Some("K1"));
        handles.push(tokio::spawn(async move { engine.initiate(request).await }));
    }
    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.len(), 5);
    let ids: HashSet<_> = outcomes.iter().map(|o| o.transaction.id).collect();
    assert_eq!(ids.len(), 1, "all responses share one transaction");
    let idempotent = outcomes.iter().filter(|o| o.is_idempotent).count();
    assert_eq!(idempotent, 4, "exactly one response is the original");
    assert_eq!(h.gateway.initialize_calls(), 1, "gateway called once");

    let transactions = h
        .store
        .transactions_for_user(actor.user_id, 10)
        .await
        .unwrap();
    assert_eq!(transactions.len(), 1);
}

/// Verifier and webhook race to complete the same reference: the world ends
/// exactly as a single completion, with two tickets total.
#[tokio::test]
async fn webhook_and_verifier_race_is_absorbed() {
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

    let verifier = {
        let engine = Arc::clone(&h.engine);
        let reference = reference.clone();
        tokio::spawn(async move { engine.verify(&reference).await })
    };
    let webhook = {
        let webhooks = Arc::clone(&h.webhooks);
        tokio::spawn(async move { webhooks.ingest(&body, Some(&signature)).await })
    };

    let verify_result = verifier.await.unwrap().unwrap();
    let ack = webhook.await.unwrap();
    assert!(ack.success && ack.handled);

    let tickets = h
        .store
        .tickets_for_order(verify_result.order.id)
        .await
        .unwrap();
    assert_eq!(tickets.len(), 2, "exactly two tickets despite the race");

    let event_after = h.store.event(event.id).await.unwrap().unwrap();
    assert_eq!(event_after.tier(tier_id).unwrap().sold_count, 2);
    assert_eq!(event_after.total_tickets_sold, 2);
}

/// Calling complete again after completion returns the existing result.
#[tokio::test]
async fn complete_is_idempotent_at_the_boundary() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 4);
    seed_event(&h, &event).await;
    let actor = buyer();

    let outcome = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 3, Some("K1")))
        .await
        .unwrap();
    let payment = VerifiedPayment::success(Money::from_minor(15_000));

    let first = h
        .engine
        .complete(outcome.transaction.id, &payment)
        .await
        .unwrap();
    assert!(!first.already_completed);

    for _ in 0..3 {
        let again = h
            .engine
            .complete(outcome.transaction.id, &payment)
            .await
            .unwrap();
        assert!(again.already_completed);
        assert_eq!(again.tickets.len(), 3);
    }

    let event_after = h.store.event(event.id).await.unwrap().unwrap();
    assert_eq!(
        event_after.tier(tier_id).unwrap().sold_count,
        3,
        "sold count incremented exactly once"
    );
}

/// Oversell at completion: the losing transaction fails, a refund intent is
/// queued, and the tier never exceeds its inventory.
#[tokio::test]
async fn oversell_at_completion_recovers_with_refund_intent() {
    let h = harness();
    let (event, tier_id) = sample_event(1, 5_000, 4);
    seed_event(&h, &event).await;

    let alice = buyer();
    let bob = buyer();
    let a = h
        .engine
        .initiate(purchase_request(&alice, &event, tier_id, 1, Some("KA")))
        .await
        .unwrap();
    let b = h
        .engine
        .initiate(purchase_request(&bob, &event, tier_id, 1, Some("KB")))
        .await
        .unwrap();

    let payment = VerifiedPayment::success(Money::from_minor(5_000));
    let first = h.engine.complete(a.transaction.id, &payment).await;
    let second = h.engine.complete(b.transaction.id, &payment).await;

    assert!(first.is_ok());
    assert!(matches!(second, Err(EngineError::OversoldAtCompletion)));

    let loser = h.store.transaction(b.transaction.id).await.unwrap().unwrap();
    assert_eq!(loser.status, TransactionStatus::Failed);
    assert_eq!(
        loser.failure.unwrap().reason,
        "oversold at completion"
    );

    let outbox = h.store.refund_outbox().await.unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].transaction_id, b.transaction.id);
    assert_eq!(outbox[0].amount, Money::from_minor(5_000));

    let event_after = h.store.event(event.id).await.unwrap().unwrap();
    assert_eq!(event_after.tier(tier_id).unwrap().sold_count, 1);
    assert_eq!(event_after.total_tickets_sold, 1);
}

/// Partial then full refund: statuses, totals, order status, and ticket
/// cancellation on the full refund only.
#[tokio::test]
async fn partial_then_full_refund() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 4);
    seed_event(&h, &event).await;
    let actor = buyer();

    let outcome = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 2, Some("K1")))
        .await
        .unwrap();
    let payment = VerifiedPayment::success(Money::from_minor(10_000));
    h.engine
        .complete(outcome.transaction.id, &payment)
        .await
        .unwrap();

    let after_partial = h
        .engine
        .refund(
            outcome.transaction.id,
            Some(Money::from_minor(3_000)),
            "customer request".to_string(),
            actor.user_id,
        )
        .await
        .unwrap();
    assert_eq!(after_partial.status, TransactionStatus::PartiallyRefunded);
    assert_eq!(after_partial.total_refunded, Money::from_minor(3_000));
    assert_eq!(after_partial.refunds.len(), 1);
    assert!(after_partial.refunds[0].gateway_refund_id.is_some());

    // Tickets survive a partial refund.
    let tickets = h
        .store
        .tickets_for_order(outcome.order.id)
        .await
        .unwrap();
    assert!(tickets.iter().all(|t| t.status == TicketStatus::Valid));

    let after_full = h
        .engine
        .refund(
            outcome.transaction.id,
            Some(Money::from_minor(7_000)),
            "customer request".to_string(),
            actor.user_id,
        )
        .await
        .unwrap();
    assert_eq!(after_full.status, TransactionStatus::Refunded);
    assert_eq!(after_full.total_refunded, Money::from_minor(10_000));

    let order = h.store.order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    let tickets = h
        .store
        .tickets_for_order(outcome.order.id)
        .await
        .unwrap();
    assert_eq!(tickets.len(), 2);
    assert!(tickets.iter().all(|t| t.status == TicketStatus::Cancelled));

    // Tier counters never decrement on refund.
    let event_after = h.store.event(event.id).await.unwrap().unwrap();
    assert_eq!(event_after.tier(tier_id).unwrap().sold_count, 2);
}

/// Refunds reject amounts beyond the remaining net, and a refunded
/// transaction is terminal.
#[tokio::test]
async fn refund_accounting_is_bounded() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 4);
    seed_event(&h, &event).await;
    let actor = buyer();

    let outcome = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 1, Some("K1")))
        .await
        .unwrap();
    let payment = VerifiedPayment::success(Money::from_minor(5_000));
    h.engine
        .complete(outcome.transaction.id, &payment)
        .await
        .unwrap();

    let too_much = h
        .engine
        .refund(
            outcome.transaction.id,
            Some(Money::from_minor(6_000)),
            "oops".to_string(),
            actor.user_id,
        )
        .await;
    assert!(matches!(
        too_much,
        Err(EngineError::InvalidRefundAmount { net: 5_000 })
    ));

    // Omitted amount refunds the remaining net.
    let full = h
        .engine
        .refund(
            outcome.transaction.id,
            None,
            "full".to_string(),
            actor.user_id,
        )
        .await
        .unwrap();
    assert_eq!(full.status, TransactionStatus::Refunded);

    let again = h
        .engine
        .refund(
            outcome.transaction.id,
            None,
            "again".to_string(),
            actor.user_id,
        )
        .await;
    assert!(matches!(again, Err(EngineError::NotRefundable(_))));
}

/// A declined gateway refund leaves the ledger untouched.
#[tokio::test]
async fn gateway_refund_failure_rolls_back() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 4);
    seed_event(&h, &event).await;
    let actor = buyer();

    let outcome = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 1, Some("K1")))
        .await
        .unwrap();
    h.engine
        .complete(
            outcome.transaction.id,
            &VerifiedPayment::success(Money::from_minor(5_000)),
        )
        .await
        .unwrap();

    h.gateway.fail_refund(true);
    let result = h
        .engine
        .refund(
            outcome.transaction.id,
            None,
            "declined".to_string(),
            actor.user_id,
        )
        .await;
    assert!(matches!(result, Err(EngineError::GatewayRefund(_))));

    let txn = h
        .store
        .transaction(outcome.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Completed);
    assert!(txn.refunds.is_empty());
    assert_eq!(txn.total_refunded, Money::ZERO);
}

/// State-machine closure at the operation level: wrong-state calls are
/// rejected without writes.
#[tokio::test]
async fn wrong_state_operations_are_rejected() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 4);
    seed_event(&h, &event).await;
    let actor = buyer();

    let outcome = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 1, Some("K1")))
        .await
        .unwrap();
    let id = outcome.transaction.id;

    // Refund and retry are not available on an initiated transaction.
    assert!(matches!(
        h.engine.refund(id, None, "no".to_string(), actor.user_id).await,
        Err(EngineError::NotRefundable(TransactionStatus::Initiated))
    ));
    assert!(matches!(
        h.engine.retry(id).await,
        Err(EngineError::NotRetryable(TransactionStatus::Initiated))
    ));

    // Complete it, then failing it is an invalid transition.
    h.engine
        .complete(id, &VerifiedPayment::success(Money::from_minor(5_000)))
        .await
        .unwrap();
    let fail = h
        .engine
        .fail(id, stagepass::types::Failure::reason("late decline"))
        .await;
    assert!(matches!(
        fail,
        Err(EngineError::InvalidTransition {
            from: TransactionStatus::Completed,
            to: TransactionStatus::Failed,
        })
    ));
}

/// Initiate preconditions fail fast with typed validation errors.
#[tokio::test]
async fn initiate_preconditions() {
    let h = harness();
    let (mut event, tier_id) = sample_event(10, 5_000, 2);
    seed_event(&h, &event).await;
    let actor = buyer();

    // Quantity bounds.
    for quantity in [0, 11] {
        let result = h
            .engine
            .initiate(purchase_request(&actor, &event, tier_id, quantity, None))
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidQuantity { .. })
        ));
    }

    // Per-user ceiling counts existing non-cancelled tickets.
    let first = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 2, Some("K1")))
        .await
        .unwrap();
    h.engine
        .complete(
            first.transaction.id,
            &VerifiedPayment::success(Money::from_minor(10_000)),
        )
        .await
        .unwrap();
    let over_limit = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 1, Some("K2")))
        .await;
    assert!(matches!(
        over_limit,
        Err(EngineError::TierLimitExceeded { max_per_user: 2 })
    ));

    // Sold-out tier.
    let other = buyer();
    let sold_out = h
        .engine
        .initiate(purchase_request(&other, &event, tier_id, 9, Some("K3")))
        .await;
    assert!(matches!(sold_out, Err(EngineError::TierSoldOut { .. })));

    // Unpublished event.
    event.status = stagepass::types::EventStatus::Draft;
    h.store.put_event(&event).await.unwrap();
    let unpublished = h
        .engine
        .initiate(purchase_request(&other, &event, tier_id, 1, Some("K4")))
        .await;
    assert!(matches!(
        unpublished,
        Err(EngineError::EventNotPurchasable(_))
    ));
}

/// Gateway initialization failure fails the transaction and schedules it
/// for retry.
#[tokio::test]
async fn initiate_gateway_failure_fails_and_schedules_retry() {
    let h = harness();
    let (event, tier_id) = sample_event(10, 5_000, 4);
    seed_event(&h, &event).await;
    let actor = buyer();

    h.gateway.fail_initialize(true);
    let result = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, 1, Some("K1")))
        .await;
    assert!(matches!(result, Err(EngineError::GatewayInit(_))));

    let transactions = h
        .store
        .transactions_for_user(actor.user_id, 10)
        .await
        .unwrap();
    assert_eq!(transactions.len(), 1);
    let txn = &transactions[0];
    assert_eq!(txn.status, TransactionStatus::Failed);
    assert_eq!(txn.failure.as_ref().unwrap().reason, "init failed");
    assert!(txn.next_retry_at.is_some(), "scheduled for retry");

    let order = h.store.order(txn.order_id).await.unwrap().unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Failed);
}
