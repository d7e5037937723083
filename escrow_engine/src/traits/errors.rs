use thiserror::Error;

use crate::db_types::{BookingId, EscrowId, EscrowStatus};

/// Errors raised by the engine and its database backends.
///
/// Everything except [`EngineError::DatabaseError`] is a caller-facing condition that can be reported verbatim.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("We have an internal database engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
    #[error("Invalid argument. {0}")]
    Validation(String),
    #[error("Permission denied. {0}")]
    PermissionDenied(String),
    #[error("Escrow {0} does not exist")]
    EscrowNotFound(EscrowId),
    #[error("Booking {0} does not exist")]
    BookingNotFound(BookingId),
    #[error("Payment {0} does not exist")]
    PaymentNotFound(String),
    #[error("Refund #{0} does not exist")]
    RefundNotFound(i64),
    #[error("Cannot {operation} escrow {id} while it is {status}")]
    InvalidState { id: EscrowId, operation: &'static str, status: EscrowStatus },
    #[error("{0}")]
    FailedPrecondition(String),
    #[error("A payment with idempotency key {0} already exists")]
    PaymentAlreadyExists(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::DatabaseError(e.to_string())
    }
}

impl EngineError {
    pub fn invalid_state(id: &EscrowId, operation: &'static str, status: EscrowStatus) -> Self {
        Self::InvalidState { id: id.clone(), operation, status }
    }
}
