use std::fmt::Display;

use escrow_engine::db_types::{Escrow, Payment, Payout, Refund, SupplierTier};
use payment_providers::PaymentMethod;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

/// Wraps a response body as `{ "success": true, ...fields }`. `T` must serialize as a map.
#[derive(Debug, Clone, Serialize)]
pub struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> Success<T> {
    pub fn new(data: T) -> Self {
        Self { success: true, data }
    }
}

//----------------------------------------------   Payments  ----------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    pub booking_id: String,
    pub method: PaymentMethod,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentResponse {
    pub payment: Payment,
    pub escrow_id: Option<String>,
    pub checkout_url: Option<String>,
    /// The reference the payer must quote on a bank transfer.
    pub reference: Option<String>,
    /// True when the idempotency key had already produced this payment.
    pub existing: bool,
}

impl PaymentIntentResponse {
    pub fn new(payment: Payment, existing: bool) -> Self {
        let escrow_id = payment.escrow_id().map(|id| id.to_string());
        let checkout_url = payment.checkout_url.clone();
        let reference = payment.metadata.0.get("reference").and_then(|v| v.as_str()).map(String::from);
        Self { payment, escrow_id, checkout_url, reference, existing }
    }
}

//----------------------------------------------   Escrows  ----------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowView {
    pub escrow: Escrow,
    pub payout: Option<Payout>,
    pub refund: Option<Refund>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteServiceParams {
    /// Overrides the default dispute window.
    #[serde(default)]
    pub hours: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseParams {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundEscrowParams {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeParams {
    pub reason: String,
}

//----------------------------------------------   Admin  ----------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingParams {
    pub id: String,
    pub client_id: String,
    pub supplier_id: String,
    /// In minor units.
    pub total_amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierParams {
    pub supplier_id: String,
    pub user_id: String,
    pub tier: SupplierTier,
    /// A per-supplier fee, in percent, that takes precedence over the tier rate.
    #[serde(default)]
    pub fee_percent: Option<f64>,
    #[serde(default)]
    pub fee_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoReleaseResult {
    pub released: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    /// `processed`, `ignored`, or `flagged` when the event could not be applied and was written to the audit log
    pub status: String,
    pub payment_id: Option<String>,
}

impl WebhookAck {
    pub fn processed<S: Into<String>>(payment_id: S) -> Self {
        Self { status: "processed".into(), payment_id: Some(payment_id.into()) }
    }

    pub fn ignored() -> Self {
        Self { status: "ignored".into(), payment_id: None }
    }

    pub fn flagged<S: Into<String>>(payment_id: S) -> Self {
        Self { status: "flagged".into(), payment_id: Some(payment_id.into()) }
    }
}
