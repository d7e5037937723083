use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    api::{
        authorization::{authorize_cancel, authorize_confirm, authorize_pay, Caller},
        escrow_api::EscrowApi,
    },
    db_types::{
        Amount,
        Booking,
        BookingId,
        Escrow,
        EscrowStatus,
        NewEscrow,
        NewPayment,
        Payment,
        PaymentId,
        PaymentRecordStatus,
    },
    traits::{BookingLedger, EngineError, EscrowManagement, LedgerExtras, PaymentManagement},
};

/// What a caller should be charged for, once the booking and its escrow have been checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPlan {
    pub booking: Booking,
    pub escrow: Escrow,
    pub amount: Amount,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PaymentIntent {
    /// The idempotency key has been used before. This is the payment it produced.
    Existing(Payment),
    /// A new payment must be created with the provider for this plan.
    New(IntentPlan),
}

/// The result of applying a provider-reported status to a local payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub payment: Payment,
    /// True if this call changed the payment's status.
    pub changed: bool,
    /// The booking, when the payment was (or had already been) credited to it.
    pub booking: Option<Booking>,
    /// The escrow funded by this payment, if it has one.
    pub escrow: Option<Escrow>,
}

/// `PaymentFlowApi` takes a payment from intent to settlement.
///
/// Provider calls are made by the caller of this API. This API decides what to charge, records the result, and runs
/// the effects of a completed payment: crediting the booking ledger and funding the escrow. Those effects are
/// idempotent and are re-run whenever a completion is reported again, which heals an earlier, interrupted delivery.
pub struct PaymentFlowApi<B> {
    db: B,
    escrows: EscrowApi<B>,
}

impl<B> Debug for PaymentFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentFlowApi")
    }
}

impl<B: Clone> Clone for PaymentFlowApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), escrows: self.escrows.clone() }
    }
}

impl<B: Clone> PaymentFlowApi<B> {
    pub fn new(escrows: EscrowApi<B>) -> Self {
        Self { db: escrows.db().clone(), escrows }
    }
}

impl<B> PaymentFlowApi<B>
where B: PaymentManagement + EscrowManagement + BookingLedger
{
    pub async fn fetch_payment(&self, id: &PaymentId) -> Result<Payment, EngineError> {
        self.db.fetch_payment(id).await?.ok_or_else(|| EngineError::PaymentNotFound(id.to_string()))
    }

    pub async fn fetch_payment_by_provider_id(
        &self,
        provider: &str,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, EngineError> {
        self.db.fetch_payment_by_provider_id(provider, provider_payment_id).await
    }

    pub async fn fetch_payment_by_provider_intent(
        &self,
        provider: &str,
        provider_intent_id: &str,
    ) -> Result<Option<Payment>, EngineError> {
        self.db.fetch_payment_by_provider_intent(provider, provider_intent_id).await
    }

    /// Remembers the provider's intent id for a payment so that later events quoting only the intent can find it.
    pub async fn link_provider_intent(&self, id: &PaymentId, provider_intent_id: &str) -> Result<Payment, EngineError> {
        let payment = self.db.link_provider_intent(id, provider_intent_id).await?;
        if payment.provider_intent_id.as_deref() != Some(provider_intent_id) {
            warn!(
                "💰️ Payment {id} is already linked to intent {:?}. The provider reported {provider_intent_id}",
                payment.provider_intent_id
            );
        }
        Ok(payment)
    }

    /// Works out what the caller must pay for a booking.
    ///
    /// A booking has at most one open escrow. An escrow still waiting for payment is reused; otherwise a new one is
    /// created for the outstanding balance. A booking whose escrow is already funded cannot be paid again.
    pub async fn prepare_payment_intent(
        &self,
        caller: &Caller,
        booking_id: &BookingId,
        idempotency_key: Option<String>,
    ) -> Result<PaymentIntent, EngineError> {
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(payment) = self.db.fetch_payment_by_idempotency_key(key).await? {
                if payment.payer_id != caller.user_id || &payment.booking_id != booking_id {
                    return Err(EngineError::Validation(format!(
                        "Idempotency key {key} has already been used for a different request"
                    )));
                }
                debug!("💰️ Idempotency key {key} already produced payment {}", payment.id);
                return Ok(PaymentIntent::Existing(payment));
            }
        }
        let booking = self.db.fetch_booking(booking_id).await?.ok_or_else(|| EngineError::BookingNotFound(booking_id.clone()))?;
        authorize_pay(caller, &booking)?;
        let escrow = match self.db.fetch_open_escrow_for_booking(booking_id).await? {
            Some(escrow) if escrow.status == EscrowStatus::PendingPayment => {
                debug!("💰️ Reusing escrow {} for booking {booking_id}", escrow.id);
                escrow
            },
            Some(escrow) => {
                return Err(EngineError::FailedPrecondition(format!(
                    "Booking {booking_id} is already paid. Its escrow {} is {}",
                    escrow.id, escrow.status
                )))
            },
            None => {
                let outstanding = booking.outstanding();
                if !outstanding.is_positive() {
                    return Err(EngineError::FailedPrecondition(format!(
                        "Booking {booking_id} has no outstanding balance"
                    )));
                }
                let new_escrow = NewEscrow {
                    booking_id: booking.id.clone(),
                    client_id: booking.client_id.clone(),
                    supplier_id: booking.supplier_id.clone(),
                    total_amount: outstanding,
                    currency: booking.currency.clone(),
                };
                self.escrows.create_escrow(new_escrow, &caller.user_id).await?
            },
        };
        let amount = escrow.total_amount;
        Ok(PaymentIntent::New(IntentPlan { booking, escrow, amount, idempotency_key }))
    }

    /// Stores a payment the provider has just created.
    ///
    /// If a concurrent request with the same idempotency key won the race, that request's payment is returned.
    pub async fn record_payment(&self, payment: NewPayment) -> Result<Payment, EngineError> {
        let key = payment.idempotency_key.clone();
        match self.db.insert_payment(payment).await {
            Ok(payment) => {
                info!("💰️ Payment {} of {} recorded for booking {}", payment.id, payment.amount, payment.booking_id);
                Ok(payment)
            },
            Err(EngineError::PaymentAlreadyExists(msg)) => {
                let Some(key) = key else {
                    return Err(EngineError::PaymentAlreadyExists(msg));
                };
                debug!("💰️ Payment for idempotency key {key} was created concurrently. Returning it");
                self.db
                    .fetch_payment_by_idempotency_key(&key)
                    .await?
                    .ok_or_else(|| EngineError::PaymentNotFound(format!("idempotency key {key}")))
            },
            Err(e) => Err(e),
        }
    }

    /// Fetches a payment that `caller` intends to confirm.
    pub async fn payment_for_confirmation(&self, caller: &Caller, id: &PaymentId) -> Result<Payment, EngineError> {
        let payment = self.fetch_payment(id).await?;
        authorize_confirm(caller, &payment)?;
        Ok(payment)
    }

    /// Applies a provider-reported status to the local payment.
    ///
    /// A completion credits the booking and funds the escrow. These effects run again if the payment is already
    /// completed. A completion for a payment that was closed without being paid leaves it closed and flags the capture
    /// in the audit log. Any other status is a compare-and-set from `pending`; reports that arrive after the payment
    /// has settled are ignored.
    pub async fn apply_provider_status(
        &self,
        id: &PaymentId,
        status: PaymentRecordStatus,
        confirmed_amount: Option<Amount>,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<PaymentOutcome, EngineError> {
        match status {
            PaymentRecordStatus::Completed => self.complete_payment(id, confirmed_amount, paid_at).await,
            PaymentRecordStatus::Pending => {
                let payment = self.fetch_payment(id).await?;
                trace!("💰️ Payment {id} is still pending with the provider");
                Ok(PaymentOutcome { payment, changed: false, booking: None, escrow: None })
            },
            status => {
                let update = self.db.update_payment_status(id, status).await?;
                if update.changed {
                    info!("💰️ Payment {id} is now {status}");
                } else {
                    debug!("💰️ Payment {id} is {}. Provider status {status} ignored", update.payment.status);
                }
                Ok(PaymentOutcome { payment: update.payment, changed: update.changed, booking: None, escrow: None })
            },
        }
    }

    async fn complete_payment(
        &self,
        id: &PaymentId,
        confirmed_amount: Option<Amount>,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<PaymentOutcome, EngineError> {
        let stored = self.fetch_payment(id).await?;
        let confirmed_amount = confirmed_amount.filter(|a| a.is_positive());
        if stored.status.is_closed_unpaid() {
            warn!(
                "💰️ Provider reports payment {id} as captured, but it is {}. Flagged for reconciliation",
                stored.status
            );
            self.db.flag_late_capture(id, confirmed_amount).await?;
            return Ok(PaymentOutcome { payment: stored, changed: false, booking: None, escrow: None });
        }
        if let Some(confirmed) = confirmed_amount {
            if stored.status == PaymentRecordStatus::Pending && confirmed != stored.amount {
                warn!(
                    "💰️ Provider confirmed {confirmed} for payment {id}, but {} was requested. Using the confirmed amount",
                    stored.amount
                );
            }
        }
        let extras = LedgerExtras::for_method(stored.provider.clone(), paid_at.unwrap_or_else(Utc::now));
        let completion = self.db.complete_payment(id, confirmed_amount, extras).await?;
        if completion.changed {
            info!("💰️ Payment {id} completed. {} credited to booking {}", completion.payment.amount, completion.payment.booking_id);
        } else {
            debug!("💰️ Payment {id} was already completed. Re-running settlement effects");
        }
        let escrow = match completion.payment.escrow_id() {
            Some(escrow_id) => Some(self.escrows.fund_escrow(&escrow_id, completion.payment.id.as_str()).await?.escrow),
            None => None,
        };
        Ok(PaymentOutcome {
            payment: completion.payment,
            changed: completion.changed,
            booking: Some(completion.ledger.booking),
            escrow,
        })
    }

    /// Cancels a pending payment. Only the payer may do this.
    pub async fn cancel_payment(&self, caller: &Caller, id: &PaymentId) -> Result<Payment, EngineError> {
        let payment = self.fetch_payment(id).await?;
        authorize_cancel(caller, &payment)?;
        if payment.status != PaymentRecordStatus::Pending {
            return Err(EngineError::FailedPrecondition(format!(
                "Payment {id} is {} and can no longer be cancelled",
                payment.status
            )));
        }
        let update = self.db.update_payment_status(id, PaymentRecordStatus::Cancelled).await?;
        if !update.changed {
            return Err(EngineError::FailedPrecondition(format!(
                "Payment {id} became {} before it could be cancelled",
                update.payment.status
            )));
        }
        info!("💰️ Payment {id} cancelled by {}", caller.user_id);
        Ok(update.payment)
    }
}
