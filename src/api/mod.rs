//! HTTP handlers for the engine-facing surface.
//!
//! Handlers are thin: extract, call the engine, map the typed result. No
//! engine logic lives here.

pub mod tickets;
pub mod transactions;
pub mod validate;
pub mod webhooks;
