//! stagepass: the payment-order-ticket transaction engine behind a
//! concert-ticketing backend.
//!
//! The core guarantees, in one place:
//!
//! - **No double charge**: initiation is idempotent under a unique
//!   idempotency key; concurrent duplicates collapse onto one transaction
//!   and the gateway is called at most once.
//! - **No oversell**: tier counters move only inside the completion
//!   transaction, under the event row lock plus a compare-and-set belt;
//!   oversell discovered at completion is recovered by failing the
//!   transaction and queueing a refund intent, never persisted.
//! - **Exactly-once ticketing**: the completion boundary is idempotent, so
//!   the verifier endpoint and gateway webhooks can race freely.
//! - **Single-use admission**: gate scans verify an offline HMAC token and
//!   enforce one check-in per ticket with an optimistic compare-and-set.
//!
//! Modules mirror the moving parts: [`engine`] drives the transaction state
//! machine over the [`store`] port, [`gateway`] abstracts the payment
//! provider, [`token`] signs and verifies ticket QR tokens, [`gate`]
//! validates scans, [`webhook`] ingests gateway callbacks, [`retry`]
//! reopens failed transactions, and [`server`]/[`api`] expose the HTTP
//! surface.

pub mod api;
pub mod audit;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod retry;
pub mod server;
pub mod splits;
pub mod store;
pub mod token;
pub mod types;
pub mod webhook;

pub use config::Config;
pub use engine::TransactionEngine;
pub use error::{EngineError, Result};
