use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db_types::{Escrow, EscrowStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    EscrowFunded,
    ServiceCompleted,
    EscrowReleased,
    EscrowRefunded,
    EscrowDisputed,
}

/// A message for a single user. Delivery (push, email, ...) is up to the subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: Value,
}

impl NotificationEvent {
    fn for_escrow(user_id: &str, kind: NotificationKind, title: &str, body: String, escrow: &Escrow) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind,
            title: title.to_string(),
            body,
            data: json!({ "escrowId": escrow.id, "bookingId": escrow.booking_id }),
        }
    }

    pub fn escrow_funded(escrow: &Escrow) -> Self {
        let body = format!("Payment of {} {} is secured in escrow for your booking.", escrow.total_amount, escrow.currency);
        Self::for_escrow(&escrow.supplier_id, NotificationKind::EscrowFunded, "Booking paid", body, escrow)
    }

    pub fn service_completed(escrow: &Escrow, hours: i64) -> Self {
        let body = format!(
            "Your service has been marked complete. Confirm it or raise a dispute within {hours} hours, after which \
             the payment is released automatically."
        );
        Self::for_escrow(&escrow.client_id, NotificationKind::ServiceCompleted, "Service completed", body, escrow)
    }

    pub fn escrow_released(escrow: &Escrow, recipient_id: &str) -> Self {
        let body = format!("Your payout of {} {} is on its way.", escrow.supplier_payout, escrow.currency);
        Self::for_escrow(recipient_id, NotificationKind::EscrowReleased, "Payment released", body, escrow)
    }

    pub fn escrow_refunded(escrow: &Escrow) -> Self {
        let body = format!("A refund of {} {} has been issued for your booking.", escrow.total_amount, escrow.currency);
        Self::for_escrow(&escrow.client_id, NotificationKind::EscrowRefunded, "Refund issued", body, escrow)
    }

    pub fn escrow_disputed(escrow: &Escrow, reason: &str) -> Self {
        let body = format!("The client has disputed this booking: {reason}");
        Self::for_escrow(&escrow.supplier_id, NotificationKind::EscrowDisputed, "Booking disputed", body, escrow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowChangedEvent {
    pub escrow: Escrow,
    pub previous_status: EscrowStatus,
}

impl EscrowChangedEvent {
    pub fn new(escrow: Escrow, previous_status: EscrowStatus) -> Self {
        Self { escrow, previous_status }
    }
}
