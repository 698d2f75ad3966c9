//! Application state for the HTTP server.
//!
//! Holds the engine, gate validator and webhook processor behind `Arc`s;
//! cloned cheaply per request.

use crate::audit::AuditEmitter;
use crate::clock::{Clock, IdSource};
use crate::config::Config;
use crate::engine::{EngineConfig, TransactionEngine};
use crate::gate::GateValidator;
use crate::gateway::PaymentGateway;
use crate::retry::RetryPolicy;
use crate::splits::SplitsCalculator;
use crate::store::Store;
use crate::token::TicketTokenCodec;
use crate::webhook::WebhookProcessor;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Configuration, for handlers that need settings.
    pub config: Arc<Config>,
    /// The transaction engine.
    pub engine: Arc<TransactionEngine>,
    /// Gate scan validation.
    pub gate: Arc<GateValidator>,
    /// Webhook ingestion.
    pub webhooks: Arc<WebhookProcessor>,
    /// Direct store access for plain reads.
    pub store: Arc<dyn Store>,
}

impl AppState {
    /// Wire the full application from its ports.
    #[must_use]
    pub fn build(
        config: Config,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdSource>,
        audit: Arc<dyn AuditEmitter>,
    ) -> Self {
        let codec = TicketTokenCodec::new(config.token.qr_secret_key.as_bytes());
        let retry = RetryPolicy::from_config(&config.retry);
        let engine = Arc::new(TransactionEngine::new(
            Arc::clone(&store),
            gateway,
            Arc::clone(&clock),
            ids,
            codec.clone(),
            Arc::clone(&audit),
            SplitsCalculator::new(config.splits.organizer_percent),
            EngineConfig {
                currency: config.gateway.currency.clone(),
                provider: "paystack".to_string(),
                gateway_timeout: config.gateway.timeout,
                retry,
            },
        ));
        let gate = Arc::new(GateValidator::new(
            Arc::clone(&store),
            codec,
            Arc::clone(&clock),
            Arc::clone(&audit),
        ));
        let webhooks = Arc::new(WebhookProcessor::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            audit,
            config
                .gateway
                .payment_secret_key
                .as_ref()
                .map(|s| s.as_bytes().to_vec()),
        ));
        Self {
            config: Arc::new(config),
            engine,
            gate,
            webhooks,
            store,
        }
    }
}
