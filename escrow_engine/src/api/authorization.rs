//! Who may do what to an escrow or a payment.
//!
//! Routes authenticate the caller; the checks here decide whether that caller is a party to the record being touched.
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Booking, Escrow, Payment, Role, Roles},
    traits::EngineError,
};

/// The authenticated identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    pub roles: Roles,
}

impl Caller {
    pub fn new<S: Into<String>>(user_id: S, roles: Roles) -> Self {
        Self { user_id: user_id.into(), roles }
    }

    pub fn user<S: Into<String>>(user_id: S) -> Self {
        Self::new(user_id, vec![Role::User])
    }

    pub fn admin<S: Into<String>>(user_id: S) -> Self {
        Self::new(user_id, vec![Role::User, Role::Admin])
    }

    /// An internal actor, such as the auto-release sweep. System callers have admin rights.
    pub fn system<S: Into<String>>(name: S) -> Self {
        Self::new(name, vec![Role::Admin])
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    fn is(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

fn deny(caller: &Caller, action: &str, resource: &str) -> EngineError {
    EngineError::PermissionDenied(format!("{} is not allowed to {action} {resource}", caller.user_id))
}

pub fn authorize_view(caller: &Caller, escrow: &Escrow) -> Result<(), EngineError> {
    if caller.is_admin() || caller.is(&escrow.client_id) || caller.is(&escrow.supplier_id) {
        Ok(())
    } else {
        Err(deny(caller, "view", &format!("escrow {}", escrow.id)))
    }
}

/// Only the client (or an admin) releases funds. The supplier never can.
pub fn authorize_release(caller: &Caller, escrow: &Escrow) -> Result<(), EngineError> {
    if caller.is_admin() || caller.is(&escrow.client_id) {
        Ok(())
    } else {
        Err(deny(caller, "release", &format!("escrow {}", escrow.id)))
    }
}

pub fn authorize_refund(caller: &Caller, escrow: &Escrow) -> Result<(), EngineError> {
    if caller.is_admin() || caller.is(&escrow.supplier_id) {
        Ok(())
    } else {
        Err(deny(caller, "refund", &format!("escrow {}", escrow.id)))
    }
}

pub fn authorize_dispute(caller: &Caller, escrow: &Escrow) -> Result<(), EngineError> {
    if caller.is_admin() || caller.is(&escrow.client_id) {
        Ok(())
    } else {
        Err(deny(caller, "dispute", &format!("escrow {}", escrow.id)))
    }
}

pub fn authorize_complete(caller: &Caller, escrow: &Escrow) -> Result<(), EngineError> {
    if caller.is_admin() || caller.is(&escrow.supplier_id) {
        Ok(())
    } else {
        Err(deny(caller, "mark service completed on", &format!("escrow {}", escrow.id)))
    }
}

pub fn authorize_confirm(caller: &Caller, payment: &Payment) -> Result<(), EngineError> {
    if caller.is_admin() || caller.is(&payment.payer_id) {
        Ok(())
    } else {
        Err(deny(caller, "confirm", &format!("payment {}", payment.id)))
    }
}

/// Cancelling is reserved for the payer. Admins have no override here.
pub fn authorize_cancel(caller: &Caller, payment: &Payment) -> Result<(), EngineError> {
    if caller.is(&payment.payer_id) {
        Ok(())
    } else {
        Err(deny(caller, "cancel", &format!("payment {}", payment.id)))
    }
}

pub fn authorize_pay(caller: &Caller, booking: &Booking) -> Result<(), EngineError> {
    if caller.is(&booking.client_id) {
        Ok(())
    } else {
        Err(deny(caller, "pay for", &format!("booking {}", booking.id)))
    }
}
