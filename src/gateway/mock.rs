//! Deterministic mock gateway for development and tests.
//!
//! Initialization always succeeds (unless told to fail), verification
//! replays scripted outcomes or settles the initialized amount, and every
//! call is counted so tests can assert the gateway was reached exactly as
//! often as the contract allows.

use super::{
    CreateSubaccountRequest, CreateSubaccountResponse, GatewayError, GatewayRefundRequest,
    GatewayRefundResponse, InitializeRequest, InitializeResponse, PaymentGateway,
    VerifiedPayment,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Mock payment gateway.
#[derive(Debug, Default)]
pub struct MockGateway {
    initialized: Mutex<HashMap<String, InitializeRequest>>,
    scripted_verify: Mutex<HashMap<String, VerifiedPayment>>,
    initialize_calls: AtomicU32,
    refund_calls: AtomicU32,
    fail_initialize: AtomicBool,
    fail_refund: AtomicBool,
}

impl MockGateway {
    /// Create a mock that succeeds on everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arc-wrapped instance for sharing.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Script the verification outcome for a reference.
    #[allow(clippy::unwrap_used)]
    pub fn script_verify(&self, reference: impl Into<String>, payment: VerifiedPayment) {
        self.scripted_verify
            .lock()
            .unwrap()
            .insert(reference.into(), payment);
    }

    /// Make subsequent `initialize` calls fail.
    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `refund` calls fail.
    pub fn fail_refund(&self, fail: bool) {
        self.fail_refund.store(fail, Ordering::SeqCst);
    }

    /// Number of `initialize` calls observed.
    #[must_use]
    pub fn initialize_calls(&self) -> u32 {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    /// Number of `refund` calls observed.
    #[must_use]
    pub fn refund_calls(&self) -> u32 {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initialize(
        &self,
        request: InitializeRequest,
    ) -> Result<InitializeResponse, GatewayError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("mock initialize failure".to_string()));
        }
        let reference = request.reference.clone();
        if let Ok(mut initialized) = self.initialized.lock() {
            initialized.insert(reference.clone(), request);
        }
        tracing::debug!(reference = %reference, "mock checkout initialized");
        Ok(InitializeResponse {
            authorization_url: format!("https://checkout.mock/{reference}"),
            access_code: format!("mock_access_{reference}"),
            reference,
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, GatewayError> {
        if let Ok(scripted) = self.scripted_verify.lock() {
            if let Some(payment) = scripted.get(reference) {
                return Ok(payment.clone());
            }
        }
        let initialized = self
            .initialized
            .lock()
            .map_err(|_| GatewayError::Unavailable("mock poisoned".to_string()))?;
        initialized.get(reference).map_or_else(
            || Err(GatewayError::UnknownReference(reference.to_string())),
            |request| Ok(VerifiedPayment::success(request.amount)),
        )
    }

    async fn refund(
        &self,
        request: GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(GatewayError::Declined("mock refund failure".to_string()));
        }
        tracing::debug!(
            reference = %request.transaction_reference,
            amount = request.amount.minor(),
            "mock refund accepted"
        );
        Ok(GatewayRefundResponse {
            gateway_refund_id: format!("mock_refund_{}", Uuid::new_v4()),
        })
    }

    async fn create_subaccount(
        &self,
        request: CreateSubaccountRequest,
    ) -> Result<CreateSubaccountResponse, GatewayError> {
        tracing::debug!(business = %request.business_name, "mock subaccount created");
        Ok(CreateSubaccountResponse {
            subaccount_code: format!("ACCT_mock_{}", Uuid::new_v4().simple()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Money;

    fn request(reference: &str) -> InitializeRequest {
        InitializeRequest {
            email: "buyer@example.com".to_string(),
            amount: Money::from_minor(10_000),
            reference: reference.to_string(),
            subaccount_code: None,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn verify_settles_the_initialized_amount() {
        let gateway = MockGateway::new();
        gateway.initialize(request("ref-1")).await.unwrap();
        let payment = gateway.verify("ref-1").await.unwrap();
        assert_eq!(payment.amount, Money::from_minor(10_000));
        assert_eq!(gateway.initialize_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_reference_errors() {
        let gateway = MockGateway::new();
        assert!(matches!(
            gateway.verify("nope").await,
            Err(GatewayError::UnknownReference(_))
        ));
    }

    #[tokio::test]
    async fn failure_injection_applies() {
        let gateway = MockGateway::new();
        gateway.fail_initialize(true);
        assert!(gateway.initialize(request("ref-2")).await.is_err());
        assert_eq!(gateway.initialize_calls(), 1);
    }

    #[tokio::test]
    async fn subaccounts_are_minted() {
        let gateway = MockGateway::new();
        let response = gateway
            .create_subaccount(CreateSubaccountRequest {
                business_name: "Night Owl Events".to_string(),
                bank_code: "058".to_string(),
                account_number: "0123456789".to_string(),
                percentage_charge: 10,
            })
            .await
            .unwrap();
        assert!(response.subaccount_code.starts_with("ACCT_mock_"));
    }
}
