use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
pub use meg_common::Amount;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow, Type};
use thiserror::Error;

use crate::fees::FeeRate;

#[derive(Debug, Clone, Error)]
#[error("Invalid {kind}: {value}")]
pub struct ConversionError {
    kind: &'static str,
    value: String,
}

impl ConversionError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

/// Declares a string-backed identifier newtype.
macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

//--------------------------------------     Identifiers     ---------------------------------------------------------
string_id!(BookingId);
string_id!(EscrowId);
string_id!(PaymentId);

impl EscrowId {
    pub fn random() -> Self {
        Self(format!("esc_{:016x}", rand::random::<u64>()))
    }
}

impl PaymentId {
    pub fn random() -> Self {
        Self(format!("pay_{:016x}", rand::random::<u64>()))
    }
}

/// Macro to implement `Display`, `FromStr` and the lenient `From<String>` for the text-backed status enums.
macro_rules! text_enum {
    ($name:ident, $kind:literal, $default:ident, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    s => Err(ConversionError::new($kind, s)),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                value.parse().unwrap_or_else(|_| {
                    error!("Invalid {}: {value}. This conversion cannot fail. Defaulting to {}", $kind, Self::$default);
                    Self::$default
                })
            }
        }
    };
}

//--------------------------------------     EscrowStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Created, waiting for the client's payment to complete.
    PendingPayment,
    /// The client's payment has completed. Funds are held by the platform.
    Funded,
    /// The supplier has delivered. The dispute window is open until `auto_release_at`.
    ServiceCompleted,
    /// Terminal. The supplier payout has been recorded.
    Released,
    /// Terminal. The client refund has been recorded.
    Refunded,
    /// The client has contested the service. Only a refund (or admin intervention) moves it on.
    Disputed,
}

text_enum!(EscrowStatus, "escrow status", PendingPayment, {
    PendingPayment => "pending_payment",
    Funded => "funded",
    ServiceCompleted => "service_completed",
    Released => "released",
    Refunded => "refunded",
    Disputed => "disputed",
});

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }

    /// True once the client's money has reached the escrow, including every later state.
    pub fn is_funded_or_beyond(&self) -> bool {
        !matches!(self, Self::PendingPayment)
    }
}

//--------------------------------------   PaymentStatus     ---------------------------------------------------------
/// The balance-derived payment status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
}

text_enum!(PaymentStatus, "booking payment status", Unpaid, {
    Unpaid => "unpaid",
    PartiallyPaid => "partially_paid",
    Paid => "paid",
});

//-------------------------------------- BookingEscrowStatus ---------------------------------------------------------
/// The escrow marker written onto a booking as its escrow progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingEscrowStatus {
    None,
    EscrowFunded,
    Released,
    Refunded,
}

text_enum!(BookingEscrowStatus, "booking escrow status", None, {
    None => "none",
    EscrowFunded => "escrow_funded",
    Released => "released",
    Refunded => "refunded",
});

//-------------------------------------- PaymentRecordStatus ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentRecordStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Refunded,
}

text_enum!(PaymentRecordStatus, "payment status", Pending, {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
    Expired => "expired",
    Refunded => "refunded",
});

impl PaymentRecordStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Closed without the money ever arriving.
    pub fn is_closed_unpaid(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Expired)
    }

    /// Payment records only move out of `pending`, with the single exception of a completed payment that is later
    /// refunded.
    pub fn can_transition_to(&self, next: PaymentRecordStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Pending) => false,
            (Self::Pending, _) => true,
            (Self::Completed, Self::Refunded) => true,
            _ => false,
        }
    }
}

//--------------------------------------    SupplierTier     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SupplierTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

text_enum!(SupplierTier, "supplier tier", Bronze, {
    Bronze => "bronze",
    Silver => "silver",
    Gold => "gold",
    Platinum => "platinum",
});

//--------------------------------------  SettlementStatus   ---------------------------------------------------------
/// Lifecycle of payout and refund records. Both start as `pending`; moving money is a downstream concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

text_enum!(SettlementStatus, "settlement status", Pending, {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

//--------------------------------------        Role         ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

text_enum!(Role, "role", User, {
    User => "user",
    Admin => "admin",
});

pub type Roles = Vec<Role>;

//--------------------------------------       Booking       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub client_id: String,
    pub supplier_id: String,
    pub total_amount: Amount,
    pub currency: String,
    pub paid_amount: Amount,
    pub payment_status: PaymentStatus,
    pub escrow_status: BookingEscrowStatus,
    pub supplier_paid: bool,
    pub refunded_amount: Amount,
    pub last_payment_method: Option<String>,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// The status reported to the rest of the marketplace. Escrow markers take precedence over the balance-derived
    /// status once an escrow has been funded.
    pub fn effective_payment_status(&self) -> &'static str {
        match self.escrow_status {
            BookingEscrowStatus::None => self.payment_status.as_str(),
            s => s.as_str(),
        }
    }

    pub fn outstanding(&self) -> Amount {
        self.total_amount - self.paid_amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub id: BookingId,
    pub client_id: String,
    pub supplier_id: String,
    pub total_amount: Amount,
    pub currency: String,
}

impl NewBooking {
    pub fn new<S: Into<String>>(id: BookingId, client_id: S, supplier_id: S, total_amount: Amount) -> Self {
        Self {
            id,
            client_id: client_id.into(),
            supplier_id: supplier_id.into(),
            total_amount,
            currency: meg_common::DEFAULT_CURRENCY_CODE.to_string(),
        }
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct AppliedPayment {
    pub booking_id: BookingId,
    pub payment_id: String,
    pub amount: Amount,
    pub applied_at: DateTime<Utc>,
}

//--------------------------------------       Escrow        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub booking_id: BookingId,
    pub payment_id: Option<String>,
    pub client_id: String,
    pub supplier_id: String,
    pub total_amount: Amount,
    pub platform_fee: Amount,
    pub platform_fee_bps: i64,
    pub supplier_payout: Amount,
    pub currency: String,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub service_completed_at: Option<DateTime<Utc>>,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub released_by: Option<String>,
    pub release_notes: Option<String>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub dispute_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refunded_by: Option<String>,
    pub refund_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Escrow {
    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::from_bps(self.platform_fee_bps)
    }

    /// A JSON snapshot for audit entries.
    pub fn audit_snapshot(&self) -> Value {
        serde_json::json!({
            "status": self.status,
            "totalAmount": self.total_amount,
            "platformFee": self.platform_fee,
            "platformFeePercent": self.fee_rate().percent(),
            "supplierPayout": self.supplier_payout,
            "paymentId": self.payment_id,
        })
    }
}

/// The request to create an escrow. The fee is resolved by the escrow API, which turns this into [`EscrowTerms`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEscrow {
    pub booking_id: BookingId,
    pub client_id: String,
    pub supplier_id: String,
    pub total_amount: Amount,
    pub currency: String,
}

/// A fully priced escrow, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowTerms {
    pub id: EscrowId,
    pub escrow: NewEscrow,
    pub fee_rate: FeeRate,
    pub platform_fee: Amount,
    pub supplier_payout: Amount,
}

//--------------------------------------       Payment       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    /// The provider's handle for the money movement behind `provider_payment_id`, once the provider has reported one.
    /// Checkout sessions learn their payment intent on completion, and refunds are reported against it.
    pub provider_intent_id: Option<String>,
    pub booking_id: BookingId,
    pub payer_id: String,
    pub amount: Amount,
    pub currency: String,
    pub status: PaymentRecordStatus,
    pub checkout_url: Option<String>,
    pub metadata: Json<Value>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// The escrow this payment funds, if the payment was created for one.
    pub fn escrow_id(&self) -> Option<EscrowId> {
        self.metadata.0.get("escrowId").and_then(Value::as_str).map(EscrowId::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub id: PaymentId,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub booking_id: BookingId,
    pub payer_id: String,
    pub amount: Amount,
    pub currency: String,
    pub checkout_url: Option<String>,
    pub metadata: Value,
    pub idempotency_key: Option<String>,
}

impl NewPayment {
    pub fn new<S: Into<String>>(provider: S, booking_id: BookingId, payer_id: S, amount: Amount) -> Self {
        Self {
            id: PaymentId::random(),
            provider: provider.into(),
            provider_payment_id: None,
            booking_id,
            payer_id: payer_id.into(),
            amount,
            currency: meg_common::DEFAULT_CURRENCY_CODE.to_string(),
            checkout_url: None,
            metadata: Value::Object(Default::default()),
            idempotency_key: None,
        }
    }

    pub fn with_escrow(mut self, escrow_id: &EscrowId) -> Self {
        if let Value::Object(map) = &mut self.metadata {
            map.insert("escrowId".into(), Value::String(escrow_id.to_string()));
        }
        self
    }

    pub fn with_provider_payment_id<S: Into<String>>(mut self, id: S) -> Self {
        self.provider_payment_id = Some(id.into());
        self
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }
}

//--------------------------------------   Payout / Refund   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Payout {
    pub id: i64,
    pub escrow_id: EscrowId,
    pub booking_id: BookingId,
    pub recipient_id: String,
    pub amount: Amount,
    pub currency: String,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Refund {
    pub id: i64,
    pub escrow_id: EscrowId,
    pub booking_id: BookingId,
    pub payment_id: Option<String>,
    pub client_id: String,
    pub amount: Amount,
    pub currency: String,
    pub reason: Option<String>,
    pub requested_by: String,
    pub status: SettlementStatus,
    pub provider_refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------  Supplier profiles  ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SupplierProfile {
    pub supplier_id: String,
    /// The user account that receives payouts for this supplier.
    pub user_id: String,
    pub tier: SupplierTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSupplierProfile {
    pub supplier_id: String,
    pub user_id: String,
    pub tier: SupplierTier,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct FeeOverride {
    pub supplier_id: String,
    pub fee_bps: i64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeOverride {
    pub fn rate(&self) -> FeeRate {
        FeeRate::from_bps(self.fee_bps)
    }
}

//--------------------------------------      Audit log      ---------------------------------------------------------
pub const AUDIT_CATEGORY_FINANCE: &str = "finance";

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub category: String,
    pub event_type: String,
    pub actor: String,
    pub resource_id: String,
    pub previous_value: Json<Value>,
    pub new_value: Json<Value>,
    pub metadata: Json<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub event_type: String,
    pub actor: String,
    pub resource_id: String,
    pub previous_value: Value,
    pub new_value: Value,
    pub metadata: Value,
}

impl NewAuditEntry {
    pub fn new<S: Into<String>>(event_type: &str, actor: S, resource_id: S) -> Self {
        Self {
            event_type: event_type.to_string(),
            actor: actor.into(),
            resource_id: resource_id.into(),
            previous_value: Value::Null,
            new_value: Value::Null,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_change(mut self, previous: Value, new: Value) -> Self {
        self.previous_value = previous;
        self.new_value = new;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}
