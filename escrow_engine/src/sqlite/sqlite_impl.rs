//! `SqliteDatabase` is a concrete implementation of an escrow engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use serde_json::json;
use sqlx::SqlitePool;

use super::db::{
    audit,
    bookings,
    db_url,
    escrows,
    escrows::EscrowChanges,
    new_pool,
    payments,
    settlements,
    suppliers,
};
use crate::{
    db_types::{
        Amount,
        AppliedPayment,
        AuditLogEntry,
        Booking,
        BookingId,
        Escrow,
        EscrowId,
        EscrowStatus,
        EscrowTerms,
        FeeOverride,
        NewAuditEntry,
        NewBooking,
        NewPayment,
        NewSupplierProfile,
        Payment,
        PaymentId,
        PaymentRecordStatus,
        Payout,
        Refund,
        SupplierProfile,
    },
    fees::FeeRate,
    traits::{
        BookingLedger,
        EngineError,
        EscrowManagement,
        EscrowTransition,
        LedgerApplyResult,
        LedgerExtras,
        PaymentCompletion,
        PaymentManagement,
        PaymentUpdate,
        RefundResult,
        ReleaseResult,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// The URL of the database
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies any outstanding schema migrations.
    pub async fn migrate(&self) -> Result<(), EngineError> {
        sqlx::migrate!("./src/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::DatabaseError(format!("Migration failed. {e}")))?;
        info!("🗃️ Database migrations are up to date");
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), EngineError> {
        self.pool.close().await;
        Ok(())
    }
}

impl BookingLedger for SqliteDatabase {
    async fn upsert_booking(&self, booking: NewBooking) -> Result<Booking, EngineError> {
        let mut tx = self.pool.begin().await?;
        let booking = bookings::upsert_booking(booking, &mut tx).await?;
        tx.commit().await?;
        Ok(booking)
    }

    async fn fetch_booking(&self, id: &BookingId) -> Result<Option<Booking>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        bookings::fetch_booking(id, &mut conn).await
    }

    async fn apply_payment_to_booking(
        &self,
        booking_id: &BookingId,
        payment_id: &str,
        amount: Amount,
        extras: LedgerExtras,
    ) -> Result<LedgerApplyResult, EngineError> {
        let mut tx = self.pool.begin().await?;
        let result = apply_to_ledger(booking_id, payment_id, amount, extras, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_applied_payments(&self, booking_id: &BookingId) -> Result<Vec<AppliedPayment>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        bookings::fetch_applied_payments(booking_id, &mut conn).await
    }

    async fn recompute_booking_balance(&self, booking_id: &BookingId) -> Result<Booking, EngineError> {
        let mut tx = self.pool.begin().await?;
        let booking = bookings::recompute_paid_amount(booking_id, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Booking {booking_id} balance recomputed: {} ({})", booking.paid_amount, booking.payment_status);
        Ok(booking)
    }
}

async fn apply_to_ledger(
    booking_id: &BookingId,
    payment_id: &str,
    amount: Amount,
    extras: LedgerExtras,
    conn: &mut sqlx::SqliteConnection,
) -> Result<LedgerApplyResult, EngineError> {
    let inserted = bookings::insert_applied_payment(booking_id, payment_id, amount, &mut *conn).await?;
    if !inserted {
        debug!("🗃️ Payment {payment_id} was already applied to booking {booking_id}");
        let booking = bookings::fetch_booking(booking_id, conn)
            .await?
            .ok_or_else(|| EngineError::BookingNotFound(booking_id.clone()))?;
        return Ok(LedgerApplyResult { already_applied: true, booking });
    }
    let booking = bookings::credit_booking(booking_id, amount, extras, conn).await?;
    Ok(LedgerApplyResult { already_applied: false, booking })
}

/// Reconstructs the state an escrow left when it reached a terminal state. Transitions always open with the write, so
/// the prior status is read back from the timestamps each state leaves behind.
fn status_before(escrow: &Escrow) -> EscrowStatus {
    if escrow.status == EscrowStatus::Refunded && escrow.disputed_at.is_some() {
        EscrowStatus::Disputed
    } else if escrow.service_completed_at.is_some() {
        EscrowStatus::ServiceCompleted
    } else {
        EscrowStatus::Funded
    }
}

impl EscrowManagement for SqliteDatabase {
    async fn fetch_supplier_profile(&self, supplier_id: &str) -> Result<Option<SupplierProfile>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        suppliers::fetch_supplier_profile(supplier_id, &mut conn).await
    }

    async fn upsert_supplier_profile(&self, profile: NewSupplierProfile) -> Result<SupplierProfile, EngineError> {
        let mut conn = self.pool.acquire().await?;
        suppliers::upsert_supplier_profile(profile, &mut conn).await
    }

    async fn fetch_fee_override(&self, supplier_id: &str) -> Result<Option<FeeOverride>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        suppliers::fetch_fee_override(supplier_id, &mut conn).await
    }

    async fn set_fee_override(
        &self,
        supplier_id: &str,
        rate: FeeRate,
        reason: Option<String>,
    ) -> Result<FeeOverride, EngineError> {
        let mut conn = self.pool.acquire().await?;
        suppliers::upsert_fee_override(supplier_id, rate, reason, &mut conn).await
    }

    async fn insert_escrow(&self, terms: EscrowTerms, actor: &str) -> Result<Escrow, EngineError> {
        let mut tx = self.pool.begin().await?;
        let escrow = escrows::insert_escrow(terms, &mut tx).await?;
        let entry = NewAuditEntry::new("escrow_created", actor, escrow.id.as_str())
            .with_change(serde_json::Value::Null, escrow.audit_snapshot())
            .with_metadata(json!({ "bookingId": escrow.booking_id, "supplierId": escrow.supplier_id }));
        audit::insert_audit_entry(entry, &mut tx).await?;
        tx.commit().await?;
        Ok(escrow)
    }

    async fn fetch_escrow(&self, id: &EscrowId) -> Result<Option<Escrow>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        escrows::fetch_escrow(id, &mut conn).await
    }

    async fn fetch_open_escrow_for_booking(&self, booking_id: &BookingId) -> Result<Option<Escrow>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        escrows::fetch_open_escrow_for_booking(booking_id, &mut conn).await
    }

    async fn fund_escrow(&self, id: &EscrowId, payment_id: &str) -> Result<EscrowTransition, EngineError> {
        let mut tx = self.pool.begin().await?;
        let changes = EscrowChanges {
            payment_id: Some(payment_id.to_string()),
            funded_at: Some(Utc::now()),
            ..Default::default()
        };
        let from = [EscrowStatus::PendingPayment];
        let funded = escrows::transition_escrow(id, &from, EscrowStatus::Funded, changes, &mut tx).await?;
        let Some(escrow) = funded else {
            let escrow = escrows::fetch_existing_escrow(id, &mut tx).await?;
            tx.commit().await?;
            return Ok(EscrowTransition::unchanged(escrow));
        };
        bookings::mark_escrow_funded(&escrow.booking_id, &mut tx).await?;
        let entry = NewAuditEntry::new("escrow_funded", "system", escrow.id.as_str())
            .with_change(json!({ "status": EscrowStatus::PendingPayment }), escrow.audit_snapshot())
            .with_metadata(json!({ "paymentId": payment_id, "bookingId": escrow.booking_id }));
        audit::insert_audit_entry(entry, &mut tx).await?;
        tx.commit().await?;
        Ok(EscrowTransition::changed(escrow, EscrowStatus::PendingPayment))
    }

    async fn mark_service_completed(
        &self,
        id: &EscrowId,
        auto_release_at: DateTime<Utc>,
        actor: &str,
    ) -> Result<EscrowTransition, EngineError> {
        let mut tx = self.pool.begin().await?;
        let changes = EscrowChanges {
            service_completed_at: Some(Utc::now()),
            auto_release_at: Some(auto_release_at),
            ..Default::default()
        };
        let from = [EscrowStatus::Funded];
        let completed = escrows::transition_escrow(id, &from, EscrowStatus::ServiceCompleted, changes, &mut tx).await?;
        let Some(escrow) = completed else {
            let escrow = escrows::fetch_existing_escrow(id, &mut tx).await?;
            tx.commit().await?;
            return Ok(EscrowTransition::unchanged(escrow));
        };
        let entry = NewAuditEntry::new("escrow_service_completed", actor, escrow.id.as_str())
            .with_change(json!({ "status": EscrowStatus::Funded }), escrow.audit_snapshot())
            .with_metadata(json!({ "autoReleaseAt": auto_release_at }));
        audit::insert_audit_entry(entry, &mut tx).await?;
        tx.commit().await?;
        Ok(EscrowTransition::changed(escrow, EscrowStatus::Funded))
    }

    async fn release_escrow(
        &self,
        id: &EscrowId,
        released_by: &str,
        recipient_id: &str,
        notes: Option<String>,
    ) -> Result<ReleaseResult, EngineError> {
        let mut tx = self.pool.begin().await?;
        let changes = EscrowChanges {
            released_at: Some(Utc::now()),
            released_by: Some(released_by.to_string()),
            release_notes: notes.clone(),
            ..Default::default()
        };
        let from = [EscrowStatus::Funded, EscrowStatus::ServiceCompleted];
        let released = escrows::transition_escrow(id, &from, EscrowStatus::Released, changes, &mut tx).await?;
        let Some(escrow) = released else {
            let escrow = escrows::fetch_existing_escrow(id, &mut tx).await?;
            if escrow.status != EscrowStatus::Released {
                return Err(EngineError::invalid_state(id, "release", escrow.status));
            }
            let payout = settlements::fetch_payout_for_escrow(id, &mut tx).await?.ok_or_else(|| {
                EngineError::DatabaseError(format!("Escrow {id} is released but has no payout record"))
            })?;
            tx.commit().await?;
            return Ok(ReleaseResult { escrow, payout, already_released: true });
        };
        let previous_status = status_before(&escrow);
        let payout = settlements::insert_payout(&escrow, recipient_id, &mut tx).await?;
        bookings::mark_supplier_paid(&escrow.booking_id, &mut tx).await?;
        let entry = NewAuditEntry::new("escrow_released", released_by, escrow.id.as_str())
            .with_change(json!({ "status": previous_status }), escrow.audit_snapshot())
            .with_metadata(json!({ "payoutId": payout.id, "recipientId": recipient_id, "notes": notes }));
        audit::insert_audit_entry(entry, &mut tx).await?;
        tx.commit().await?;
        Ok(ReleaseResult { escrow, payout, already_released: false })
    }

    async fn refund_escrow(
        &self,
        id: &EscrowId,
        refunded_by: &str,
        reason: Option<String>,
    ) -> Result<RefundResult, EngineError> {
        let mut tx = self.pool.begin().await?;
        let changes = EscrowChanges {
            refunded_at: Some(Utc::now()),
            refunded_by: Some(refunded_by.to_string()),
            refund_reason: reason.clone(),
            ..Default::default()
        };
        let from = [EscrowStatus::Funded, EscrowStatus::ServiceCompleted, EscrowStatus::Disputed];
        let refunded = escrows::transition_escrow(id, &from, EscrowStatus::Refunded, changes, &mut tx).await?;
        let Some(escrow) = refunded else {
            let escrow = escrows::fetch_existing_escrow(id, &mut tx).await?;
            return Err(EngineError::invalid_state(id, "refund", escrow.status));
        };
        let previous_status = status_before(&escrow);
        let refund = settlements::insert_refund(&escrow, refunded_by, reason.clone(), &mut tx).await?;
        bookings::mark_refunded(&escrow.booking_id, escrow.total_amount, &mut tx).await?;
        let entry = NewAuditEntry::new("escrow_refunded", refunded_by, escrow.id.as_str())
            .with_change(json!({ "status": previous_status }), escrow.audit_snapshot())
            .with_metadata(json!({ "refundId": refund.id, "reason": reason }));
        audit::insert_audit_entry(entry, &mut tx).await?;
        tx.commit().await?;
        Ok(RefundResult { escrow, refund })
    }

    async fn dispute_escrow(&self, id: &EscrowId, raised_by: &str, reason: &str) -> Result<Escrow, EngineError> {
        let mut tx = self.pool.begin().await?;
        let changes = EscrowChanges {
            disputed_at: Some(Utc::now()),
            dispute_reason: Some(reason.to_string()),
            ..Default::default()
        };
        let from = [EscrowStatus::Funded, EscrowStatus::ServiceCompleted];
        let disputed = escrows::transition_escrow(id, &from, EscrowStatus::Disputed, changes, &mut tx).await?;
        let Some(escrow) = disputed else {
            let escrow = escrows::fetch_existing_escrow(id, &mut tx).await?;
            return Err(EngineError::invalid_state(id, "dispute", escrow.status));
        };
        let previous_status = if escrow.service_completed_at.is_some() {
            EscrowStatus::ServiceCompleted
        } else {
            EscrowStatus::Funded
        };
        let entry = NewAuditEntry::new("escrow_disputed", raised_by, escrow.id.as_str())
            .with_change(json!({ "status": previous_status }), escrow.audit_snapshot())
            .with_metadata(json!({ "reason": reason }));
        audit::insert_audit_entry(entry, &mut tx).await?;
        tx.commit().await?;
        Ok(escrow)
    }

    async fn fetch_due_auto_releases(&self, now: DateTime<Utc>) -> Result<Vec<Escrow>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        escrows::fetch_due_auto_releases(now, &mut conn).await
    }

    async fn fetch_payout_for_escrow(&self, id: &EscrowId) -> Result<Option<Payout>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        settlements::fetch_payout_for_escrow(id, &mut conn).await
    }

    async fn fetch_refund_for_escrow(&self, id: &EscrowId) -> Result<Option<Refund>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        settlements::fetch_refund_for_escrow(id, &mut conn).await
    }

    async fn fetch_refund(&self, refund_id: i64) -> Result<Option<Refund>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        settlements::fetch_refund(refund_id, &mut conn).await
    }

    async fn mark_refund_processing(&self, refund_id: i64, provider_refund_id: &str) -> Result<Refund, EngineError> {
        let mut tx = self.pool.begin().await?;
        let updated = settlements::mark_refund_processing(refund_id, provider_refund_id, &mut tx).await?;
        let refund = match updated {
            Some(r) => r,
            None => {
                let existing =
                    settlements::fetch_refund(refund_id, &mut tx).await?.ok_or(EngineError::RefundNotFound(refund_id))?;
                return Err(EngineError::FailedPrecondition(format!(
                    "Refund #{refund_id} is {} and cannot be submitted to the provider again",
                    existing.status
                )));
            },
        };
        let entry = NewAuditEntry::new("refund_submitted", "system", refund.escrow_id.as_str())
            .with_metadata(json!({ "refundId": refund.id, "providerRefundId": provider_refund_id }));
        audit::insert_audit_entry(entry, &mut tx).await?;
        tx.commit().await?;
        Ok(refund)
    }

    async fn fetch_audit_log(&self, resource_id: &str) -> Result<Vec<AuditLogEntry>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        audit::fetch_audit_log(resource_id, &mut conn).await
    }
}

impl PaymentManagement for SqliteDatabase {
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, EngineError> {
        let mut conn = self.pool.acquire().await?;
        payments::insert_payment(payment, &mut conn).await
    }

    async fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_payment(id, &mut conn).await
    }

    async fn fetch_payment_by_provider_id(
        &self,
        provider: &str,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_payment_by_provider_id(provider, provider_payment_id, &mut conn).await
    }

    async fn fetch_payment_by_provider_intent(
        &self,
        provider: &str,
        provider_intent_id: &str,
    ) -> Result<Option<Payment>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_payment_by_provider_intent(provider, provider_intent_id, &mut conn).await
    }

    async fn link_provider_intent(&self, id: &PaymentId, provider_intent_id: &str) -> Result<Payment, EngineError> {
        let mut conn = self.pool.acquire().await?;
        match payments::link_provider_intent(id, provider_intent_id, &mut conn).await? {
            Some(payment) => Ok(payment),
            None => {
                payments::fetch_payment(id, &mut conn).await?.ok_or_else(|| EngineError::PaymentNotFound(id.to_string()))
            },
        }
    }

    async fn fetch_payment_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_payment_by_idempotency_key(key, &mut conn).await
    }

    async fn update_payment_status(
        &self,
        id: &PaymentId,
        status: PaymentRecordStatus,
    ) -> Result<PaymentUpdate, EngineError> {
        if status == PaymentRecordStatus::Completed {
            return Err(EngineError::Validation("Completed payments must be recorded with complete_payment".into()));
        }
        let mut tx = self.pool.begin().await?;
        let from = match status {
            PaymentRecordStatus::Refunded => PaymentRecordStatus::Completed,
            _ => PaymentRecordStatus::Pending,
        };
        let updated = payments::transition_payment(id, from, status, &mut tx).await?;
        let result = match updated {
            Some(payment) => PaymentUpdate { payment, changed: true },
            None => {
                let payment = payments::fetch_payment(id, &mut tx)
                    .await?
                    .ok_or_else(|| EngineError::PaymentNotFound(id.to_string()))?;
                trace!("🗃️ Payment {id} is {}. Status update to {status} skipped", payment.status);
                PaymentUpdate { payment, changed: false }
            },
        };
        tx.commit().await?;
        Ok(result)
    }

    async fn complete_payment(
        &self,
        id: &PaymentId,
        confirmed_amount: Option<Amount>,
        extras: LedgerExtras,
    ) -> Result<PaymentCompletion, EngineError> {
        let mut tx = self.pool.begin().await?;
        let (payment, changed) = match payments::complete_pending_payment(id, confirmed_amount, &mut tx).await? {
            Some(p) => (p, true),
            None => {
                let p = payments::fetch_payment(id, &mut tx)
                    .await?
                    .ok_or_else(|| EngineError::PaymentNotFound(id.to_string()))?;
                if p.status != PaymentRecordStatus::Completed {
                    return Err(EngineError::FailedPrecondition(format!(
                        "Payment {id} is {} and cannot be completed",
                        p.status
                    )));
                }
                (p, false)
            },
        };
        let ledger = apply_to_ledger(&payment.booking_id, payment.id.as_str(), payment.amount, extras, &mut tx).await?;
        tx.commit().await?;
        if changed {
            debug!("🗃️ Payment {id} completed and credited to booking {}", payment.booking_id);
        }
        Ok(PaymentCompletion { payment, changed, ledger })
    }

    async fn flag_late_capture(
        &self,
        id: &PaymentId,
        reported_amount: Option<Amount>,
    ) -> Result<AuditLogEntry, EngineError> {
        let mut tx = self.pool.begin().await?;
        let payment =
            payments::fetch_payment(id, &mut tx).await?.ok_or_else(|| EngineError::PaymentNotFound(id.to_string()))?;
        let entry = NewAuditEntry::new("payment_captured_after_close", payment.provider.as_str(), id.as_str())
            .with_change(json!({ "status": payment.status }), json!({ "status": PaymentRecordStatus::Completed }))
            .with_metadata(json!({
                "bookingId": payment.booking_id,
                "amount": payment.amount,
                "reportedAmount": reported_amount,
            }));
        let entry = audit::insert_audit_entry(entry, &mut tx).await?;
        tx.commit().await?;
        Ok(entry)
    }
}
