use chrono::{DateTime, Utc};
use escrow_engine::{
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
    traits::{EngineError, EscrowManagement, EscrowTransition, RefundResult, ReleaseResult},
};
use mockall::mock;

mock! {
    pub EscrowManager {}
    impl Clone for EscrowManager {
        fn clone(&self) -> Self;
    }
    impl EscrowManagement for EscrowManager {
        async fn fetch_supplier_profile(&self, supplier_id: &str) -> Result<Option<SupplierProfile>, EngineError>;
        async fn upsert_supplier_profile(&self, profile: NewSupplierProfile) -> Result<SupplierProfile, EngineError>;
        async fn fetch_fee_override(&self, supplier_id: &str) -> Result<Option<FeeOverride>, EngineError>;
        async fn set_fee_override(&self, supplier_id: &str, rate: FeeRate, reason: Option<String>) -> Result<FeeOverride, EngineError>;
        async fn insert_escrow(&self, terms: EscrowTerms, actor: &str) -> Result<Escrow, EngineError>;
        async fn fetch_escrow(&self, id: &EscrowId) -> Result<Option<Escrow>, EngineError>;
        async fn fetch_open_escrow_for_booking(&self, booking_id: &BookingId) -> Result<Option<Escrow>, EngineError>;
        async fn fund_escrow(&self, id: &EscrowId, payment_id: &str) -> Result<EscrowTransition, EngineError>;
        async fn mark_service_completed(&self, id: &EscrowId, auto_release_at: DateTime<Utc>, actor: &str) -> Result<EscrowTransition, EngineError>;
        async fn release_escrow(&self, id: &EscrowId, released_by: &str, recipient_id: &str, notes: Option<String>) -> Result<ReleaseResult, EngineError>;
        async fn refund_escrow(&self, id: &EscrowId, refunded_by: &str, reason: Option<String>) -> Result<RefundResult, EngineError>;
        async fn dispute_escrow(&self, id: &EscrowId, raised_by: &str, reason: &str) -> Result<Escrow, EngineError>;
        async fn fetch_due_auto_releases(&self, now: DateTime<Utc>) -> Result<Vec<Escrow>, EngineError>;
        async fn fetch_payout_for_escrow(&self, id: &EscrowId) -> Result<Option<Payout>, EngineError>;
        async fn fetch_refund_for_escrow(&self, id: &EscrowId) -> Result<Option<Refund>, EngineError>;
        async fn fetch_refund(&self, refund_id: i64) -> Result<Option<Refund>, EngineError>;
        async fn mark_refund_processing(&self, refund_id: i64, provider_refund_id: &str) -> Result<Refund, EngineError>;
        async fn fetch_audit_log(&self, resource_id: &str) -> Result<Vec<AuditLogEntry>, EngineError>;
    }
}
