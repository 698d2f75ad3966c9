//! Payment gateway port.
//!
//! The engine talks to the payment provider through this narrow trait;
//! the provider's HTTP client lives outside the core. A deterministic
//! [`mock::MockGateway`] ships for development and tests.

pub mod mock;

use crate::types::{CardAuthorization, Money};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha512;
use thiserror::Error;

/// Gateway-level failure. The engine maps these onto transaction failures;
/// it never retries implicitly.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway declined the request.
    #[error("gateway declined: {0}")]
    Declined(String),
    /// Transport or provider fault.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// No record for the queried reference.
    #[error("unknown reference {0}")]
    UnknownReference(String),
}

/// Request to open a hosted checkout.
#[derive(Clone, Debug, PartialEq)]
pub struct InitializeRequest {
    /// Buyer email for the gateway receipt.
    pub email: String,
    /// Charge in minor units.
    pub amount: Money,
    /// Our unique reference for this attempt.
    pub reference: String,
    /// Organizer subaccount to route the split through, when present.
    pub subaccount_code: Option<String>,
    /// Free-form metadata echoed back by the gateway.
    pub metadata: Value,
}

/// Successful checkout initialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitializeResponse {
    /// Hosted checkout URL the client is redirected to.
    pub authorization_url: String,
    /// Echo of our reference.
    pub reference: String,
    /// Gateway access code for the checkout session.
    pub access_code: String,
}

/// Verdict of a verification call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyStatus {
    /// The charge settled.
    Success,
    /// The charge failed at the gateway.
    Failed,
}

/// Subaccount share the gateway already withheld for the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubaccountShare {
    /// Subaccount code the payment was routed through.
    pub code: String,
    /// Platform share in minor units.
    pub shared_amount: Money,
}

/// Verified payment facts, either from the verify endpoint or assembled
/// from a signature-checked webhook payload.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedPayment {
    /// Settlement verdict.
    pub status: VerifyStatus,
    /// Settled amount in minor units.
    pub amount: Money,
    /// Gateway fees in minor units, when reported.
    pub fees: Option<Money>,
    /// Payment channel.
    pub channel: Option<String>,
    /// Settlement time.
    pub paid_at: Option<DateTime<Utc>>,
    /// Card authorization echo.
    pub authorization: Option<CardAuthorization>,
    /// Platform share withheld by the gateway, when split at source.
    pub subaccount: Option<SubaccountShare>,
    /// The gateway's transaction identifier.
    pub gateway_transaction_id: Option<String>,
}

impl VerifiedPayment {
    /// A bare successful settlement of `amount`; fields default empty.
    #[must_use]
    pub const fn success(amount: Money) -> Self {
        Self {
            status: VerifyStatus::Success,
            amount,
            fees: None,
            channel: None,
            paid_at: None,
            authorization: None,
            subaccount: None,
            gateway_transaction_id: None,
        }
    }
}

/// Request to return money on a settled charge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayRefundRequest {
    /// Reference of the original charge.
    pub transaction_reference: String,
    /// Amount to return in minor units.
    pub amount: Money,
}

/// Accepted refund.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayRefundResponse {
    /// The gateway's refund identifier.
    pub gateway_refund_id: String,
}

/// Request to create an organizer subaccount at the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateSubaccountRequest {
    /// Legal business name.
    pub business_name: String,
    /// Settlement bank code.
    pub bank_code: String,
    /// Settlement account number.
    pub account_number: String,
    /// Percentage the platform charges on routed payments.
    pub percentage_charge: u32,
}

/// Created subaccount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateSubaccountResponse {
    /// Code to pass on future `initialize` calls.
    pub subaccount_code: String,
}

/// The payment provider, seen narrowly.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout for the given reference.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the provider declines or is down.
    async fn initialize(
        &self,
        request: InitializeRequest,
    ) -> Result<InitializeResponse, GatewayError>;

    /// Query the settlement status of a reference.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownReference`] for references the
    /// provider has never seen, or transport faults.
    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, GatewayError>;

    /// Request a refund against a settled charge.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the provider refuses the refund.
    async fn refund(
        &self,
        request: GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayError>;

    /// Create an organizer subaccount for split routing.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the provider refuses.
    async fn create_subaccount(
        &self,
        request: CreateSubaccountRequest,
    ) -> Result<CreateSubaccountResponse, GatewayError>;
}

/// Constant-time HMAC-SHA512 check of a webhook signature header against the
/// raw request body. `signature` is the hex digest the gateway sent.
#[must_use]
pub fn verify_webhook_signature(secret: &[u8], raw_body: &[u8], signature: &str) -> bool {
    let Ok(expected_sig) = hex::decode(signature.trim()) else {
        return false;
    };
    #[allow(clippy::expect_used)]
    let mut mac = Hmac::<Sha512>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(raw_body);
    mac.verify_slice(&expected_sig).is_ok()
}
