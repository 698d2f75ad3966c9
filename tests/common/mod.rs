//! Shared test harness: in-memory store, mock gateway, manual clock.

#![allow(clippy::expect_used, clippy::unwrap_used, dead_code)]

use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use stagepass::audit::CollectingAuditEmitter;
use stagepass::clock::{ManualClock, UuidIds};
use stagepass::engine::{EngineConfig, InitiateRequest, TransactionEngine};
use stagepass::gate::GateValidator;
use stagepass::gateway::mock::MockGateway;
use stagepass::retry::RetryPolicy;
use stagepass::splits::SplitsCalculator;
use stagepass::store::memory::InMemoryStore;
use stagepass::store::Store;
use stagepass::token::TicketTokenCodec;
use stagepass::types::{
    Actor, ClientMeta, Event, EventId, EventStatus, Money, Organizer, OrganizerId, Role,
    TicketTier, TierId, UserId,
};
use stagepass::webhook::WebhookProcessor;
use std::sync::Arc;
use std::time::Duration;

pub const QR_SECRET: &str = "test-qr-secret";
pub const WEBHOOK_SECRET: &[u8] = b"whsec_test_secret";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<CollectingAuditEmitter>,
    pub codec: TicketTokenCodec,
    pub engine: Arc<TransactionEngine>,
    pub gate: Arc<GateValidator>,
    pub webhooks: Arc<WebhookProcessor>,
}

pub fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(MockGateway::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 1, 18, 0, 0).unwrap(),
    ));
    let audit = Arc::new(CollectingAuditEmitter::new());
    let codec = TicketTokenCodec::new(QR_SECRET);
    let engine = Arc::new(TransactionEngine::new(
        Arc::clone(&store) as Arc<dyn stagepass::store::Store>,
        Arc::clone(&gateway) as Arc<dyn stagepass::gateway::PaymentGateway>,
        Arc::clone(&clock) as Arc<dyn stagepass::clock::Clock>,
        Arc::new(UuidIds),
        codec.clone(),
        Arc::clone(&audit) as Arc<dyn stagepass::audit::AuditEmitter>,
        SplitsCalculator::new(90),
        EngineConfig {
            currency: "NGN".to_string(),
            provider: "paystack".to_string(),
            gateway_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                base: Duration::from_millis(1_000),
                max: Duration::from_millis(30_000),
                max_attempts: 3,
            },
        },
    ));
    let gate = Arc::new(GateValidator::new(
        Arc::clone(&store) as Arc<dyn stagepass::store::Store>,
        codec.clone(),
        Arc::clone(&clock) as Arc<dyn stagepass::clock::Clock>,
        Arc::clone(&audit) as Arc<dyn stagepass::audit::AuditEmitter>,
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        Arc::clone(&engine),
        Arc::clone(&store) as Arc<dyn stagepass::store::Store>,
        Arc::clone(&audit) as Arc<dyn stagepass::audit::AuditEmitter>,
        Some(WEBHOOK_SECRET.to_vec()),
    ));
    Harness {
        store,
        gateway,
        clock,
        audit,
        codec,
        engine,
        gate,
        webhooks,
    }
}

/// A published event with one tier. Returns the event and its tier id.
pub fn sample_event(quantity: u32, price_minor: u64, max_per_user: u32) -> (Event, TierId) {
    let tier_id = TierId::new();
    let event = Event {
        id: EventId::new(),
        organizer_id: OrganizerId::new(),
        status: EventStatus::Published,
        event_date: Utc.with_ymd_and_hms(2026, 7, 1, 20, 0, 0).unwrap(),
        tiers: vec![TicketTier {
            id: tier_id,
            name: "General Admission".to_string(),
            price: Money::from_minor(price_minor),
            quantity,
            sold_count: 0,
            max_per_user,
            sale_start: None,
            sale_end: None,
        }],
        total_tickets_sold: 0,
        total_revenue: Money::ZERO,
        validators: Vec::new(),
        deleted_at: None,
    };
    (event, tier_id)
}

pub async fn seed_event(harness: &Harness, event: &Event) {
    harness.store.put_event(event).await.unwrap();
    harness
        .store
        .put_organizer(&Organizer {
            id: event.organizer_id,
            subaccount_code: Some("ACCT_org".to_string()),
            platform_fee_percent: 10,
        })
        .await
        .unwrap();
}

pub fn buyer() -> Actor {
    Actor {
        user_id: UserId::new(),
        email: "buyer@example.com".to_string(),
        role: Role::User,
        is_system: false,
    }
}

pub fn purchase_request(
    actor: &Actor,
    event: &Event,
    tier_id: TierId,
    quantity: u32,
    idempotency_key: Option<&str>,
) -> InitiateRequest {
    InitiateRequest {
        actor: actor.clone(),
        event_id: event.id,
        tier_id,
        quantity,
        idempotency_key: idempotency_key.map(ToString::to_string),
        client: ClientMeta {
            ip: Some("203.0.113.7".to_string()),
            user_agent: Some("stagepass-tests".to_string()),
        },
    }
}

/// Hex HMAC-SHA512 of `body` under the webhook secret.
pub fn sign_webhook(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(WEBHOOK_SECRET).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// A signed `charge.success` webhook body for a reference.
pub fn charge_success_body(reference: &str, amount_minor: u64) -> Vec<u8> {
    serde_json::json!({
        "event": "charge.success",
        "data": {
            "reference": reference,
            "amount": amount_minor,
            "channel": "card",
            "id": 42,
        }
    })
    .to_string()
    .into_bytes()
}
