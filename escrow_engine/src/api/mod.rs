//! # Escrow engine public API
//!
//! The API is split by concern so that callers only need the backend traits for the parts they use.
//!
//! * [`escrow_api`] drives the escrow state machine: creation and pricing, funding, service completion, release,
//!   refund, dispute and the auto-release sweep.
//! * [`ledger_api`] keeps each booking's running balance with idempotent, payment-keyed credits.
//! * [`payment_flow_api`] takes a payment from intent to settlement and runs the effects of a completed payment.
//! * [`authorization`] holds the [`Caller`](authorization::Caller) identity and the per-operation access rules.
//!
//! # API usage
//!
//! Every API is created by supplying a database backend that implements the backend traits it needs.
//!
//! ```rust,ignore
//! use escrow_engine::{events::EventProducers, fees::FeeSchedule, EscrowApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let api = EscrowApi::new(db, FeeSchedule::default(), EventProducers::default());
//! let escrow = api.escrow_for(&caller, &escrow_id).await?;
//! ```
pub mod authorization;
pub mod escrow_api;
pub mod ledger_api;
pub mod payment_flow_api;
