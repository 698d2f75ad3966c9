//! Gate validation scenarios: token checks, role gating, and the
//! single-use check-in race.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{buyer, harness, purchase_request, sample_event, seed_event, Harness};
use stagepass::gate::ScanOutcome;
use stagepass::store::Store;
use stagepass::gateway::VerifiedPayment;
use stagepass::types::{
    Actor, EventId, Money, Role, ScannerContext, Ticket, TicketStatus, UserId,
};
use std::sync::Arc;

fn staff_scanner() -> ScannerContext {
    ScannerContext {
        actor: Actor {
            user_id: UserId::new(),
            email: "gate@example.com".to_string(),
            role: Role::Organizer,
            is_system: false,
        },
        assigned_events: Vec::new(),
    }
}

fn validator_scanner(assigned: Vec<EventId>) -> ScannerContext {
    ScannerContext {
        actor: Actor {
            user_id: UserId::new(),
            email: "validator@example.com".to_string(),
            role: Role::Validator,
            is_system: false,
        },
        assigned_events: assigned,
    }
}

/// Purchase and complete one order, returning its tickets.
async fn sell_tickets(h: &Harness, quantity: u32) -> (EventId, Vec<Ticket>) {
    let (event, tier_id) = sample_event(100, 5_000, 10);
    seed_event(h, &event).await;
    let actor = buyer();
    let outcome = h
        .engine
        .initiate(purchase_request(&actor, &event, tier_id, quantity, Some("K1")))
        .await
        .unwrap();
    let amount = Money::from_minor(u64::from(quantity) * 5_000);
    let completed = h
        .engine
        .complete(outcome.transaction.id, &VerifiedPayment::success(amount))
        .await
        .unwrap();
    (event.id, completed.tickets)
}

#[tokio::test]
async fn valid_scan_checks_in_exactly_once() {
    let h = harness();
    let (event_id, tickets) = sell_tickets(&h, 1).await;
    let scanner = staff_scanner();

    let outcome = h
        .gate
        .scan(&tickets[0].qr_code, &scanner, Some(event_id))
        .await
        .unwrap();
    let ScanOutcome::Valid { ticket } = outcome else {
        panic!("expected VALID, got {outcome:?}");
    };
    assert_eq!(ticket.ticket_id, tickets[0].id);

    // Second scan of the same token reports the earlier check-in.
    let again = h
        .gate
        .scan(&tickets[0].qr_code, &scanner, Some(event_id))
        .await
        .unwrap();
    assert!(matches!(
        again,
        ScanOutcome::AlreadyUsed {
            checked_in_at: Some(_)
        }
    ));
}

/// Ten devices race on one ticket: exactly one VALID, the rest observe the
/// loss, and the winner is recorded.
#[tokio::test]
async fn scan_race_admits_exactly_one_device() {
    let h = harness();
    let (event_id, tickets) = sell_tickets(&h, 1).await;
    let qr_code = tickets[0].qr_code.clone();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let gate = Arc::clone(&h.gate);
        let qr_code = qr_code.clone();
        let scanner = staff_scanner();
        handles.push(tokio::spawn(async move {
            let outcome = gate.scan(&qr_code, &scanner, Some(event_id)).await.unwrap();
            (scanner.actor.user_id, outcome)
        }));
    }
    let results: Vec<(UserId, ScanOutcome)> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let winners: Vec<&UserId> = results
        .iter()
        .filter(|(_, outcome)| matches!(outcome, ScanOutcome::Valid { .. }))
        .map(|(scanner, _)| scanner)
        .collect();
    assert_eq!(winners.len(), 1, "exactly one scanner wins");
    for (_, outcome) in &results {
        assert!(matches!(
            outcome,
            ScanOutcome::Valid { .. }
                | ScanOutcome::AlreadyUsed { .. }
                | ScanOutcome::RaceCondition
        ));
    }

    let ticket = h
        .store
        .ticket_by_qr(&qr_code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Used);
    assert_eq!(ticket.checked_in_by.as_ref(), Some(*winners[0]).as_ref());
}

#[tokio::test]
async fn forged_and_mutated_tokens_are_invalid() {
    let h = harness();
    let (event_id, tickets) = sell_tickets(&h, 1).await;
    let scanner = staff_scanner();

    let mut forged = tickets[0].qr_code.clone();
    forged.pop();
    let outcome = h
        .gate
        .scan(&forged, &scanner, Some(event_id))
        .await
        .unwrap();
    assert_eq!(outcome, ScanOutcome::Invalid);

    let outcome = h
        .gate
        .scan("definitely-not-a-token", &scanner, Some(event_id))
        .await
        .unwrap();
    assert_eq!(outcome, ScanOutcome::Invalid);
}

/// A correctly signed token for a ticket that was never persisted.
#[tokio::test]
async fn unknown_but_well_signed_token_is_not_found() {
    let h = harness();
    let (event_id, _tickets) = sell_tickets(&h, 1).await;
    let scanner = staff_scanner();

    let ghost = h.codec.sign("ghost-ticket", &event_id.to_string(), 1);
    let outcome = h.gate.scan(&ghost, &scanner, Some(event_id)).await.unwrap();
    assert_eq!(outcome, ScanOutcome::NotFound);
}

#[tokio::test]
async fn wrong_event_claim_is_rejected_before_checkin() {
    let h = harness();
    let (_event_id, tickets) = sell_tickets(&h, 1).await;
    let scanner = staff_scanner();

    let outcome = h
        .gate
        .scan(&tickets[0].qr_code, &scanner, Some(EventId::new()))
        .await
        .unwrap();
    assert_eq!(outcome, ScanOutcome::WrongEvent);

    // The failed claim must not consume the ticket.
    let ticket = h
        .store
        .ticket_by_qr(&tickets[0].qr_code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Valid);
}

#[tokio::test]
async fn validators_are_gated_by_assignment() {
    let h = harness();
    let (event_id, tickets) = sell_tickets(&h, 2).await;

    let unassigned = validator_scanner(vec![EventId::new()]);
    let outcome = h
        .gate
        .scan(&tickets[0].qr_code, &unassigned, None)
        .await
        .unwrap();
    assert_eq!(outcome, ScanOutcome::NotAssigned);

    let assigned = validator_scanner(vec![event_id]);
    let outcome = h
        .gate
        .scan(&tickets[0].qr_code, &assigned, None)
        .await
        .unwrap();
    assert!(matches!(outcome, ScanOutcome::Valid { .. }));
}

#[tokio::test]
async fn cancelled_tickets_do_not_admit() {
    let h = harness();
    let (event, tier_id) = sample_event(100, 5_000, 10);
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
    // Full refund cancels the ticket.
    h.engine
        .refund(
            outcome.transaction.id,
            None,
            "event cancelled".to_string(),
            actor.user_id,
        )
        .await
        .unwrap();

    let tickets = h
        .store
        .tickets_for_order(outcome.order.id)
        .await
        .unwrap();
    let scan = h
        .gate
        .scan(&tickets[0].qr_code, &staff_scanner(), Some(event.id))
        .await
        .unwrap();
    assert_eq!(scan, ScanOutcome::Cancelled);
}
