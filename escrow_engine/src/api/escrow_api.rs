use std::fmt::Debug;

use chrono::Utc;
use log::*;

use crate::{
    api::authorization::{
        authorize_complete,
        authorize_dispute,
        authorize_refund,
        authorize_release,
        authorize_view,
        Caller,
    },
    db_types::{
        AuditLogEntry,
        Escrow,
        EscrowId,
        EscrowStatus,
        EscrowTerms,
        FeeOverride,
        NewEscrow,
        NewSupplierProfile,
        Payout,
        Refund,
        SupplierProfile,
    },
    events::{EscrowChangedEvent, EventProducers, NotificationEvent},
    fees::{calculate_fee, FeeRate, FeeSchedule},
    helpers::{auto_release_deadline, DEFAULT_AUTO_RELEASE_HOURS},
    traits::{EngineError, EscrowManagement, EscrowTransition, RefundResult, ReleaseResult},
};

/// The actor recorded for releases made by the auto-release sweep.
pub const AUTO_RELEASE_ACTOR: &str = "auto";

/// `EscrowApi` drives the escrow state machine.
///
/// Transitions are delegated to the backend, which applies each one as a single compare-and-set transaction. This API
/// adds fee resolution, authorization and the notifications that follow a successful transition.
pub struct EscrowApi<B> {
    db: B,
    fees: FeeSchedule,
    auto_release_hours: i64,
    producers: EventProducers,
}

impl<B> Debug for EscrowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EscrowApi ({} hour dispute window)", self.auto_release_hours)
    }
}

impl<B: Clone> Clone for EscrowApi<B> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            fees: self.fees,
            auto_release_hours: self.auto_release_hours,
            producers: self.producers.clone(),
        }
    }
}

impl<B> EscrowApi<B> {
    pub fn new(db: B, fees: FeeSchedule, producers: EventProducers) -> Self {
        Self { db, fees, auto_release_hours: DEFAULT_AUTO_RELEASE_HOURS, producers }
    }

    pub fn with_auto_release_hours(mut self, hours: i64) -> Self {
        self.auto_release_hours = hours.max(0);
        self
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fees
    }

    pub fn auto_release_hours(&self) -> i64 {
        self.auto_release_hours
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    fn publish_change(&self, escrow: &Escrow, previous_status: EscrowStatus) {
        self.producers.escrow_changed(EscrowChangedEvent::new(escrow.clone(), previous_status));
    }
}

impl<B> EscrowApi<B>
where B: EscrowManagement
{
    /// Resolves the fee rate that would apply to a new escrow for this supplier.
    pub async fn effective_fee_rate(&self, supplier_id: &str) -> Result<FeeRate, EngineError> {
        let custom = self.db.fetch_fee_override(supplier_id).await?.map(|o| o.rate());
        let tier = self.db.fetch_supplier_profile(supplier_id).await?.map(|p| p.tier);
        Ok(self.fees.resolve(custom, tier))
    }

    /// Prices and stores a new escrow in `pending_payment`.
    ///
    /// The fee rate is resolved once, here, and frozen into the record. Later changes to the fee schedule or to the
    /// supplier's tier do not affect existing escrows.
    pub async fn create_escrow(&self, escrow: NewEscrow, actor: &str) -> Result<Escrow, EngineError> {
        if !escrow.total_amount.is_positive() {
            return Err(EngineError::Validation(format!(
                "Escrow total must be positive, but was {}",
                escrow.total_amount
            )));
        }
        if !meg_common::is_valid_currency_code(&escrow.currency) {
            return Err(EngineError::Validation(format!("{} is not a valid currency code", escrow.currency)));
        }
        let fee_rate = self.effective_fee_rate(&escrow.supplier_id).await?;
        let split = calculate_fee(escrow.total_amount, fee_rate);
        let terms = EscrowTerms {
            id: EscrowId::random(),
            escrow,
            fee_rate,
            platform_fee: split.platform_fee,
            supplier_payout: split.supplier_payout,
        };
        let escrow = self.db.insert_escrow(terms, actor).await?;
        info!(
            "💰️ Escrow {} created for booking {}. Total {}, fee {} ({}), payout {}",
            escrow.id,
            escrow.booking_id,
            escrow.total_amount,
            escrow.platform_fee,
            escrow.fee_rate(),
            escrow.supplier_payout
        );
        Ok(escrow)
    }

    pub async fn fetch_escrow(&self, id: &EscrowId) -> Result<Escrow, EngineError> {
        self.db.fetch_escrow(id).await?.ok_or_else(|| EngineError::EscrowNotFound(id.clone()))
    }

    /// Fetches an escrow on behalf of one of its parties.
    pub async fn escrow_for(&self, caller: &Caller, id: &EscrowId) -> Result<Escrow, EngineError> {
        let escrow = self.fetch_escrow(id).await?;
        authorize_view(caller, &escrow)?;
        Ok(escrow)
    }

    /// Marks the escrow as funded by `payment_id`.
    ///
    /// Funding an escrow that is already funded (or further along) succeeds without changing anything, so repeated
    /// payment confirmations are harmless.
    pub async fn fund_escrow(&self, id: &EscrowId, payment_id: &str) -> Result<EscrowTransition, EngineError> {
        let transition = self.db.fund_escrow(id, payment_id).await?;
        if transition.changed {
            info!("💰️ Escrow {id} funded by payment {payment_id}");
            self.producers.notify(NotificationEvent::escrow_funded(&transition.escrow));
            self.publish_change(&transition.escrow, transition.previous_status);
        } else {
            debug!("💰️ Escrow {id} is already {}. Funding by {payment_id} is a no-op", transition.escrow.status);
        }
        Ok(transition)
    }

    /// Opens the dispute window. `hours` defaults to the configured window length.
    pub async fn mark_service_completed(
        &self,
        caller: &Caller,
        id: &EscrowId,
        hours: Option<i64>,
    ) -> Result<EscrowTransition, EngineError> {
        let escrow = self.fetch_escrow(id).await?;
        authorize_complete(caller, &escrow)?;
        let hours = hours.unwrap_or(self.auto_release_hours).max(0);
        let deadline = auto_release_deadline(Utc::now(), hours);
        let transition = self.db.mark_service_completed(id, deadline, &caller.user_id).await?;
        if transition.changed {
            info!("💰️ Escrow {id} service completed. Auto-release at {deadline}");
            self.producers.notify(NotificationEvent::service_completed(&transition.escrow, hours));
            self.publish_change(&transition.escrow, transition.previous_status);
        } else {
            warn!(
                "💰️ Escrow {id} is {} and cannot be marked as service completed. Request ignored",
                transition.escrow.status
            );
        }
        Ok(transition)
    }

    /// Releases the supplier payout. Releasing twice returns the original payout.
    pub async fn release(
        &self,
        caller: &Caller,
        id: &EscrowId,
        notes: Option<String>,
    ) -> Result<ReleaseResult, EngineError> {
        let escrow = self.fetch_escrow(id).await?;
        authorize_release(caller, &escrow)?;
        self.release_escrow(&escrow, &caller.user_id, notes).await
    }

    async fn release_escrow(
        &self,
        escrow: &Escrow,
        released_by: &str,
        notes: Option<String>,
    ) -> Result<ReleaseResult, EngineError> {
        let recipient = self.payout_recipient(&escrow.supplier_id).await?;
        let result = self.db.release_escrow(&escrow.id, released_by, &recipient, notes).await?;
        if result.already_released {
            debug!("💰️ Escrow {} was already released. Returning payout #{}", escrow.id, result.payout.id);
        } else {
            info!(
                "💰️ Escrow {} released by {released_by}. Payout #{} of {} to {recipient}",
                escrow.id, result.payout.id, result.payout.amount
            );
            self.producers.notify(NotificationEvent::escrow_released(&result.escrow, &recipient));
            self.publish_change(&result.escrow, escrow.status);
        }
        Ok(result)
    }

    /// The supplier profile's payout account, or the supplier id itself when there is no profile.
    async fn payout_recipient(&self, supplier_id: &str) -> Result<String, EngineError> {
        let profile = self.db.fetch_supplier_profile(supplier_id).await?;
        Ok(profile.map(|p| p.user_id).unwrap_or_else(|| supplier_id.to_string()))
    }

    pub async fn refund(
        &self,
        caller: &Caller,
        id: &EscrowId,
        reason: Option<String>,
    ) -> Result<RefundResult, EngineError> {
        let escrow = self.fetch_escrow(id).await?;
        authorize_refund(caller, &escrow)?;
        let result = self.db.refund_escrow(id, &caller.user_id, reason).await?;
        info!(
            "💰️ Escrow {id} refunded by {}. Refund #{} of {} to {}",
            caller.user_id, result.refund.id, result.refund.amount, result.refund.client_id
        );
        self.producers.notify(NotificationEvent::escrow_refunded(&result.escrow));
        self.publish_change(&result.escrow, escrow.status);
        Ok(result)
    }

    pub async fn dispute(&self, caller: &Caller, id: &EscrowId, reason: &str) -> Result<Escrow, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::Validation("A dispute must give a reason".into()));
        }
        let escrow = self.fetch_escrow(id).await?;
        authorize_dispute(caller, &escrow)?;
        let disputed = self.db.dispute_escrow(id, &caller.user_id, reason).await?;
        info!("💰️ Escrow {id} disputed by {}: {reason}", caller.user_id);
        self.producers.notify(NotificationEvent::escrow_disputed(&disputed, reason));
        self.publish_change(&disputed, escrow.status);
        Ok(disputed)
    }

    /// Releases every escrow whose dispute window has closed. Returns the number released.
    ///
    /// A failure on one escrow is logged and does not stop the sweep.
    pub async fn process_auto_releases(&self) -> Result<usize, EngineError> {
        let due = self.db.fetch_due_auto_releases(Utc::now()).await?;
        if due.is_empty() {
            trace!("💰️ No escrows are due for auto-release");
            return Ok(0);
        }
        debug!("💰️ {} escrows are due for auto-release", due.len());
        let mut released = 0;
        for escrow in due {
            let notes = Some("Released automatically after the dispute window closed".to_string());
            match self.release_escrow(&escrow, AUTO_RELEASE_ACTOR, notes).await {
                Ok(result) if !result.already_released => released += 1,
                Ok(_) => debug!("💰️ Escrow {} was released by someone else during the sweep", escrow.id),
                Err(e) => warn!("💰️ Could not auto-release escrow {}. {e}", escrow.id),
            }
        }
        info!("💰️ Auto-release sweep released {released} escrows");
        Ok(released)
    }

    pub async fn fetch_payout(&self, id: &EscrowId) -> Result<Option<Payout>, EngineError> {
        self.db.fetch_payout_for_escrow(id).await
    }

    pub async fn fetch_refund_for_escrow(&self, id: &EscrowId) -> Result<Option<Refund>, EngineError> {
        self.db.fetch_refund_for_escrow(id).await
    }

    pub async fn fetch_refund(&self, refund_id: i64) -> Result<Refund, EngineError> {
        self.db.fetch_refund(refund_id).await?.ok_or(EngineError::RefundNotFound(refund_id))
    }

    /// Records that the payment provider has accepted the refund.
    pub async fn refund_submitted(&self, refund_id: i64, provider_refund_id: &str) -> Result<Refund, EngineError> {
        let refund = self.db.mark_refund_processing(refund_id, provider_refund_id).await?;
        info!("💰️ Refund #{refund_id} submitted to the provider as {provider_refund_id}");
        Ok(refund)
    }

    pub async fn audit_log(&self, id: &EscrowId) -> Result<Vec<AuditLogEntry>, EngineError> {
        self.db.fetch_audit_log(id.as_str()).await
    }

    pub async fn upsert_supplier_profile(&self, profile: NewSupplierProfile) -> Result<SupplierProfile, EngineError> {
        if profile.supplier_id.is_empty() || profile.user_id.is_empty() {
            return Err(EngineError::Validation("Supplier and user ids are required".into()));
        }
        self.db.upsert_supplier_profile(profile).await
    }

    pub async fn set_fee_override(
        &self,
        supplier_id: &str,
        rate: FeeRate,
        reason: Option<String>,
    ) -> Result<FeeOverride, EngineError> {
        info!("💰️ Supplier {supplier_id} fee overridden to {rate}");
        self.db.set_fee_override(supplier_id, rate, reason).await
    }
}
