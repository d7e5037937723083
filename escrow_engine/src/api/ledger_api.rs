use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{Amount, AppliedPayment, Booking, BookingId, NewBooking},
    traits::{BookingLedger, EngineError, LedgerApplyResult, LedgerExtras},
};

/// `LedgerApi` keeps each booking's running balance.
///
/// Every credit is keyed by the payment that produced it, so applying the same payment any number of times moves the
/// balance exactly once.
pub struct LedgerApi<B> {
    db: B,
}

impl<B> Debug for LedgerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerApi")
    }
}

impl<B: Clone> Clone for LedgerApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone() }
    }
}

impl<B> LedgerApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> LedgerApi<B>
where B: BookingLedger
{
    /// Creates the booking projection, or refreshes its parties and total.
    pub async fn upsert_booking(&self, booking: NewBooking) -> Result<Booking, EngineError> {
        if booking.id.as_str().is_empty() {
            return Err(EngineError::Validation("A booking id is required".into()));
        }
        if !booking.total_amount.is_positive() {
            return Err(EngineError::Validation(format!("Booking total must be positive, but was {}", booking.total_amount)));
        }
        if !meg_common::is_valid_currency_code(&booking.currency) {
            return Err(EngineError::Validation(format!("{} is not a valid currency code", booking.currency)));
        }
        let booking = self.db.upsert_booking(booking).await?;
        debug!("📒️ Booking {} stored. Total {} {}", booking.id, booking.total_amount, booking.currency);
        Ok(booking)
    }

    pub async fn fetch_booking(&self, id: &BookingId) -> Result<Booking, EngineError> {
        self.db.fetch_booking(id).await?.ok_or_else(|| EngineError::BookingNotFound(id.clone()))
    }

    /// Credits `amount` from `payment_id` to the booking, at most once per payment.
    pub async fn apply_payment(
        &self,
        booking_id: &BookingId,
        payment_id: &str,
        amount: Amount,
        extras: LedgerExtras,
    ) -> Result<LedgerApplyResult, EngineError> {
        if payment_id.is_empty() {
            return Err(EngineError::Validation("A payment id is required to credit a booking".into()));
        }
        if !amount.is_positive() {
            return Err(EngineError::Validation(format!("Credited amounts must be positive, but was {amount}")));
        }
        let result = self.db.apply_payment_to_booking(booking_id, payment_id, amount, extras).await?;
        if result.already_applied {
            info!("📒️ Payment {payment_id} has already been credited to booking {booking_id}. Nothing to do");
        } else {
            info!(
                "📒️ Credited {amount} from payment {payment_id} to booking {booking_id}. Paid {} of {} ({})",
                result.booking.paid_amount, result.booking.total_amount, result.booking.payment_status
            );
        }
        Ok(result)
    }

    pub async fn applied_payments(&self, booking_id: &BookingId) -> Result<Vec<AppliedPayment>, EngineError> {
        self.db.fetch_applied_payments(booking_id).await
    }

    /// Rebuilds the paid balance from the applied payments. Used to repair drifted balances.
    pub async fn recompute_balance(&self, booking_id: &BookingId) -> Result<Booking, EngineError> {
        let before = self.fetch_booking(booking_id).await?;
        let after = self.db.recompute_booking_balance(booking_id).await?;
        if before.paid_amount != after.paid_amount {
            warn!(
                "📒️ Booking {booking_id} balance drifted. Was {}, recomputed as {}",
                before.paid_amount, after.paid_amount
            );
        }
        Ok(after)
    }
}
