use crate::{
    db_types::{Amount, AppliedPayment, Booking, BookingId, NewBooking},
    traits::{EngineError, LedgerApplyResult, LedgerExtras},
};

/// Backend behaviour for the booking balance ledger.
#[allow(async_fn_in_trait)]
pub trait BookingLedger: Clone {
    /// Inserts the booking projection, or refreshes the client, supplier, total and currency of an existing one.
    /// Balance and escrow markers are never touched here.
    async fn upsert_booking(&self, booking: NewBooking) -> Result<Booking, EngineError>;

    async fn fetch_booking(&self, id: &BookingId) -> Result<Option<Booking>, EngineError>;

    /// Credits `amount` to the booking exactly once per `payment_id`.
    ///
    /// In a single transaction the `(booking, payment)` pair is added to the applied set. If it was already there
    /// nothing else happens and `already_applied` is true. Otherwise `paid_amount` is incremented, the payment status
    /// is re-derived, and `extras` are written.
    async fn apply_payment_to_booking(
        &self,
        booking_id: &BookingId,
        payment_id: &str,
        amount: Amount,
        extras: LedgerExtras,
    ) -> Result<LedgerApplyResult, EngineError>;

    async fn fetch_applied_payments(&self, booking_id: &BookingId) -> Result<Vec<AppliedPayment>, EngineError>;

    /// Rebuilds `paid_amount` from the applied set and re-derives the payment status.
    async fn recompute_booking_balance(&self, booking_id: &BookingId) -> Result<Booking, EngineError>;
}
