use chrono::{DateTime, Utc};

use crate::{
    db_types::{
        AuditLogEntry,
        BookingId,
        Escrow,
        EscrowId,
        EscrowTerms,
        FeeOverride,
        NewSupplierProfile,
        Payout,
        Refund,
        SupplierProfile,
    },
    fees::FeeRate,
    traits::{EngineError, EscrowTransition, RefundResult, ReleaseResult},
};

/// Backend behaviour for escrow records and everything written alongside them.
///
/// Every state-changing method is a single compare-and-set transaction. The transition, the booking marker, any
/// payout or refund record, and the audit entry are committed together or not at all.
#[allow(async_fn_in_trait)]
pub trait EscrowManagement: Clone {
    async fn fetch_supplier_profile(&self, supplier_id: &str) -> Result<Option<SupplierProfile>, EngineError>;

    async fn upsert_supplier_profile(&self, profile: NewSupplierProfile) -> Result<SupplierProfile, EngineError>;

    async fn fetch_fee_override(&self, supplier_id: &str) -> Result<Option<FeeOverride>, EngineError>;

    async fn set_fee_override(
        &self,
        supplier_id: &str,
        rate: FeeRate,
        reason: Option<String>,
    ) -> Result<FeeOverride, EngineError>;

    /// Stores a priced escrow in `pending_payment` and writes the `escrow_created` audit entry.
    async fn insert_escrow(&self, terms: EscrowTerms, actor: &str) -> Result<Escrow, EngineError>;

    async fn fetch_escrow(&self, id: &EscrowId) -> Result<Option<Escrow>, EngineError>;

    /// The most recent escrow for the booking that has not been refunded.
    async fn fetch_open_escrow_for_booking(&self, booking_id: &BookingId) -> Result<Option<Escrow>, EngineError>;

    /// `pending_payment -> funded`. Marks the booking `escrow_funded`. Any other state returns the escrow unchanged.
    async fn fund_escrow(&self, id: &EscrowId, payment_id: &str) -> Result<EscrowTransition, EngineError>;

    /// `funded -> service_completed`, setting `auto_release_at`. Any other state returns the escrow unchanged.
    async fn mark_service_completed(
        &self,
        id: &EscrowId,
        auto_release_at: DateTime<Utc>,
        actor: &str,
    ) -> Result<EscrowTransition, EngineError>;

    /// `funded | service_completed -> released`, creating the payout to `recipient_id`. Repeating a release returns
    /// the existing payout. Other states fail with `InvalidState`.
    async fn release_escrow(
        &self,
        id: &EscrowId,
        released_by: &str,
        recipient_id: &str,
        notes: Option<String>,
    ) -> Result<ReleaseResult, EngineError>;

    /// `funded | service_completed | disputed -> refunded`, creating the refund record. Other states fail with
    /// `InvalidState`.
    async fn refund_escrow(
        &self,
        id: &EscrowId,
        refunded_by: &str,
        reason: Option<String>,
    ) -> Result<RefundResult, EngineError>;

    /// `funded | service_completed -> disputed`. Other states fail with `InvalidState`.
    async fn dispute_escrow(&self, id: &EscrowId, raised_by: &str, reason: &str) -> Result<Escrow, EngineError>;

    /// Service-completed escrows whose dispute window closed at or before `now`.
    async fn fetch_due_auto_releases(&self, now: DateTime<Utc>) -> Result<Vec<Escrow>, EngineError>;

    async fn fetch_payout_for_escrow(&self, id: &EscrowId) -> Result<Option<Payout>, EngineError>;

    async fn fetch_refund_for_escrow(&self, id: &EscrowId) -> Result<Option<Refund>, EngineError>;

    async fn fetch_refund(&self, refund_id: i64) -> Result<Option<Refund>, EngineError>;

    /// `pending -> processing` once the provider has accepted the refund.
    async fn mark_refund_processing(&self, refund_id: i64, provider_refund_id: &str) -> Result<Refund, EngineError>;

    async fn fetch_audit_log(&self, resource_id: &str) -> Result<Vec<AuditLogEntry>, EngineError>;
}
