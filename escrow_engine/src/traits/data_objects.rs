use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{Amount, Booking, Escrow, EscrowStatus, Payment, Payout, Refund};

/// Extra booking fields written in the same statement that credits a payment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerExtras {
    pub last_payment_method: Option<String>,
    pub last_payment_at: Option<DateTime<Utc>>,
}

impl LedgerExtras {
    pub fn for_method<S: Into<String>>(method: S, paid_at: DateTime<Utc>) -> Self {
        Self { last_payment_method: Some(method.into()), last_payment_at: Some(paid_at) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerApplyResult {
    /// True when this payment had been credited before. The booking was not changed.
    pub already_applied: bool,
    pub booking: Booking,
}

/// The outcome of a compare-and-set escrow transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTransition {
    pub escrow: Escrow,
    /// The status before the call. Equal to `escrow.status` when nothing changed.
    pub previous_status: EscrowStatus,
    pub changed: bool,
}

impl EscrowTransition {
    pub fn changed(escrow: Escrow, previous_status: EscrowStatus) -> Self {
        Self { escrow, previous_status, changed: true }
    }

    pub fn unchanged(escrow: Escrow) -> Self {
        let previous_status = escrow.status;
        Self { escrow, previous_status, changed: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResult {
    pub escrow: Escrow,
    pub payout: Payout,
    /// True if the escrow had already been released before this call.
    pub already_released: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    pub escrow: Escrow,
    pub refund: Refund,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentUpdate {
    pub payment: Payment,
    pub changed: bool,
}

/// The result of recording a completed payment: the status change and the ledger credit, committed together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCompletion {
    pub payment: Payment,
    pub changed: bool,
    pub ledger: LedgerApplyResult,
}

impl PaymentCompletion {
    pub fn credited_amount(&self) -> Amount {
        if self.ledger.already_applied {
            Amount::default()
        } else {
            self.payment.amount
        }
    }
}
