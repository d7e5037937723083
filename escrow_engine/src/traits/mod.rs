//! # Backend contracts
//!
//! This module defines the behaviour that database backends need to expose in order to be used by the escrow engine.
//!
//! * [`BookingLedger`] maintains the running balance of each booking, crediting every payment exactly once.
//! * [`EscrowManagement`] stores escrow records and performs their state transitions, together with the payout,
//!   refund and audit records those transitions produce.
//! * [`PaymentManagement`] stores payment records and their provider-driven status changes.
mod booking_ledger;
mod data_objects;
mod errors;
mod escrow_management;
mod payment_management;

pub use booking_ledger::BookingLedger;
pub use data_objects::{
    EscrowTransition,
    LedgerApplyResult,
    LedgerExtras,
    PaymentCompletion,
    PaymentUpdate,
    RefundResult,
    ReleaseResult,
};
pub use errors::EngineError;
pub use escrow_management::EscrowManagement;
pub use payment_management::PaymentManagement;
