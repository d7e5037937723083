use crate::{
    db_types::{Amount, AuditLogEntry, NewPayment, Payment, PaymentId, PaymentRecordStatus},
    traits::{EngineError, LedgerExtras, PaymentCompletion, PaymentUpdate},
};

/// Backend behaviour for payment records.
#[allow(async_fn_in_trait)]
pub trait PaymentManagement: Clone {
    /// Stores a new `pending` payment. A clash on the idempotency key is reported as
    /// [`EngineError::PaymentAlreadyExists`].
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, EngineError>;

    async fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, EngineError>;

    async fn fetch_payment_by_provider_id(
        &self,
        provider: &str,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, EngineError>;

    /// Looks a payment up by the intent id the provider reported for it. See [`Self::link_provider_intent`].
    async fn fetch_payment_by_provider_intent(
        &self,
        provider: &str,
        provider_intent_id: &str,
    ) -> Result<Option<Payment>, EngineError>;

    /// Stores the provider's intent id against the payment, unless one is already stored. Returns the payment as it
    /// stands afterwards.
    async fn link_provider_intent(&self, id: &PaymentId, provider_intent_id: &str) -> Result<Payment, EngineError>;

    async fn fetch_payment_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>, EngineError>;

    /// Compare-and-set status update. Only transitions allowed by [`PaymentRecordStatus::can_transition_to`] are
    /// written; anything else returns the payment with `changed = false`.
    ///
    /// Completion must go through [`Self::complete_payment`] so that the ledger is credited in the same transaction.
    async fn update_payment_status(
        &self,
        id: &PaymentId,
        status: PaymentRecordStatus,
    ) -> Result<PaymentUpdate, EngineError>;

    /// Moves a `pending` payment to `completed` and credits the booking ledger in the same transaction.
    ///
    /// If the payment is already `completed`, the ledger credit is still attempted (it is idempotent), which heals a
    /// delivery that was interrupted between the two steps. `confirmed_amount` replaces the stored amount when the
    /// provider reports a different figure.
    async fn complete_payment(
        &self,
        id: &PaymentId,
        confirmed_amount: Option<Amount>,
        extras: LedgerExtras,
    ) -> Result<PaymentCompletion, EngineError>;

    /// Writes a `payment_captured_after_close` finance audit entry. Used when a provider reports money captured for a
    /// payment that was already closed locally, so that the funds can be reconciled by hand.
    async fn flag_late_capture(
        &self,
        id: &PaymentId,
        reported_amount: Option<Amount>,
    ) -> Result<AuditLogEntry, EngineError>;
}
