//! Marketplace Escrow Engine
//!
//! The escrow engine holds a client's payment for a booking until the supplier has delivered, then settles it: the
//! supplier is paid out (less the platform fee) or the client is refunded. This library contains the settlement logic.
//! It is provider-agnostic; talking to payment providers is the job of the `payment_providers` crate.
//!
//! The library is divided into these main sections:
//! 1. Data types ([`mod@db_types`]) and the backend traits ([`mod@traits`]) that a storage backend implements. SQLite is
//!    the supported backend ([`SqliteDatabase`]). You should never need to access the database directly.
//! 2. The public API ([`mod@api`]): the escrow state machine, the booking ledger and the payment flow.
//! 3. Fee computation ([`mod@fees`]), exact to the minor unit.
//!
//! The engine also emits events when escrows change state. A simple pub-sub framework ([`mod@events`]) lets you hook
//! into these events, for example to deliver notifications to users.
pub mod api;
pub mod db_types;
pub mod events;
pub mod fees;
pub mod helpers;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use api::{
    authorization::Caller,
    escrow_api::{EscrowApi, AUTO_RELEASE_ACTOR},
    ledger_api::LedgerApi,
    payment_flow_api::{IntentPlan, PaymentFlowApi, PaymentIntent, PaymentOutcome},
};
#[cfg(feature = "sqlite")]
pub use sqlite::{db, SqliteDatabase};
pub use traits::{BookingLedger, EngineError, EscrowManagement, PaymentManagement};
