use std::{collections::HashMap, fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use meg_common::Amount;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProviderError;

//--------------------------------------   PaymentMethod     ---------------------------------------------------------
/// How the client chose to pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// A bank transfer against a generated payment reference.
    Reference,
    /// An instant payment through the reference provider's payment gateway.
    Instant,
    /// A redirect to a hosted checkout page.
    HostedCheckout,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Instant => "instant",
            Self::HostedCheckout => "hosted_checkout",
        }
    }

    /// The provider that services this method. Payments are stored and looked up under this name.
    pub fn provider_kind(&self) -> ProviderKind {
        match self {
            Self::Reference | Self::Instant => ProviderKind::Reference,
            Self::HostedCheckout => ProviderKind::HostedCheckout,
        }
    }
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reference" => Ok(Self::Reference),
            "instant" => Ok(Self::Instant),
            "hosted_checkout" | "checkout" => Ok(Self::HostedCheckout),
            other => Err(ProviderError::UnknownMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Reference,
    HostedCheckout,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::HostedCheckout => "hosted_checkout",
        }
    }

    /// The method to assume for a stored payment that does not record one.
    pub fn default_method(&self) -> PaymentMethod {
        match self {
            Self::Reference => PaymentMethod::Reference,
            Self::HostedCheckout => PaymentMethod::HostedCheckout,
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reference" => Ok(Self::Reference),
            "hosted_checkout" => Ok(Self::HostedCheckout),
            other => Err(ProviderError::NotConfigured(format!("Unknown payment provider {other}"))),
        }
    }
}

//--------------------------------------  Provider status    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Refunded,
}

/// A status report from a provider, with the amount it says was paid when it reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPaymentStatus {
    pub status: ProviderStatus,
    pub amount: Option<Amount>,
}

//--------------------------------------   Requests          ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePaymentParams {
    /// Our payment id. Providers echo it back as the merchant reference.
    pub payment_id: String,
    pub method: PaymentMethod,
    pub amount: Amount,
    pub currency: String,
    pub description: String,
    pub booking_id: String,
    pub payer_id: String,
    pub escrow_id: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedPayment {
    pub provider_payment_id: String,
    /// Where to send the payer, for redirect-based methods.
    pub checkout_url: Option<String>,
    /// The reference the payer quotes on a bank transfer.
    pub reference: Option<String>,
    /// The provider's raw response, kept with the payment's metadata.
    pub provider_data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmPaymentParams {
    pub provider_payment_id: String,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundParams {
    pub provider_payment_id: String,
    pub amount: Amount,
    pub currency: String,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRefund {
    pub provider_refund_id: String,
    pub status: String,
    pub amount: Amount,
}

//--------------------------------------   Webhooks          ---------------------------------------------------------
/// A webhook exactly as it arrived. Signatures are checked against these bytes, never a re-serialization.
#[derive(Debug, Clone, Default)]
pub struct RawWebhook {
    pub body: Vec<u8>,
    headers: HashMap<String, String>,
}

impl RawWebhook {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body, headers: HashMap::new() }
    }

    pub fn with_header<K: AsRef<str>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Header lookup is case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Refunded,
    /// Anything we do not act on. Acknowledged and otherwise ignored.
    Other(String),
}

impl WebhookEventKind {
    pub fn status(&self) -> Option<ProviderStatus> {
        match self {
            Self::Pending => Some(ProviderStatus::Pending),
            Self::Completed => Some(ProviderStatus::Completed),
            Self::Failed => Some(ProviderStatus::Failed),
            Self::Cancelled => Some(ProviderStatus::Cancelled),
            Self::Expired => Some(ProviderStatus::Expired),
            Self::Refunded => Some(ProviderStatus::Refunded),
            Self::Other(_) => None,
        }
    }
}

impl From<ProviderStatus> for WebhookEventKind {
    fn from(status: ProviderStatus) -> Self {
        match status {
            ProviderStatus::Pending => Self::Pending,
            ProviderStatus::Completed => Self::Completed,
            ProviderStatus::Failed => Self::Failed,
            ProviderStatus::Cancelled => Self::Cancelled,
            ProviderStatus::Expired => Self::Expired,
            ProviderStatus::Refunded => Self::Refunded,
        }
    }
}

/// A provider notification, normalised across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    pub event_id: String,
    pub provider_payment_id: String,
    /// The provider's handle for the underlying money movement, when it has one distinct from the payment id.
    /// Events that only know this handle carry it in both fields.
    pub payment_intent: Option<String>,
    pub reference: Option<String>,
    pub amount: Option<Amount>,
    pub currency: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}
