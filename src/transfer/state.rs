//! Transfer Saga State Machine
//!
//! Defines the saga states, events, and transition function for
//! cross-ledger transfers. Transitions are strictly forward; a record
//! that reached a terminal state never moves again.

use serde::{Deserialize, Serialize};

/// Saga states for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Validated and funds reserved locally, record persisted
    Pending,
    /// Correspondent reservation obtained (or internal route chosen)
    Reserved,
    /// Correspondent accepted the send, awaiting confirmation
    Sent,
    /// Confirmed, external reference stored, terminal
    Completed,
    /// Saga failed, reserved funds released, terminal
    Failed,
    /// Cancelled by the caller before send, funds released, terminal
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Reserved => "reserved",
            TransferStatus::Sent => "sent",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransferStatus::Pending),
            "reserved" => Some(TransferStatus::Reserved),
            "sent" => Some(TransferStatus::Sent),
            "completed" => Some(TransferStatus::Completed),
            "failed" => Some(TransferStatus::Failed),
            "cancelled" => Some(TransferStatus::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// Saga events (inputs that trigger state transitions)
#[derive(Debug, Clone, Copy)]
pub enum TransferEvent {
    /// Correspondent reservation obtained, or internal route chosen
    ReserveOk,
    /// Reservation failed permanently or retries exhausted
    ReserveFail,
    /// Correspondent accepted the send
    SendOk,
    /// Send failed permanently or retries exhausted
    SendFail,
    /// Internal destination credited
    LocalCreditOk,
    /// Confirmation returned the external reference
    ConfirmOk,
    /// Confirmation retries exhausted; rests in Sent for manual review
    ConfirmStuck,
    /// Caller cancelled before the first send attempt
    Cancel,
}

/// State transition function
///
/// Given the current state and an event, returns the next state.
/// Invalid transitions return the current state (no change).
pub fn transition(current: TransferStatus, event: TransferEvent) -> TransferStatus {
    use TransferEvent::*;
    use TransferStatus::*;

    match (current, event) {
        (Pending, ReserveOk) => Reserved,
        (Pending, ReserveFail) => Failed,

        (Reserved, SendOk) => Sent,
        (Reserved, SendFail) => Failed,
        (Reserved, LocalCreditOk) => Completed,
        (Reserved, Cancel) => Cancelled,

        (Sent, ConfirmOk) => Completed,
        // Funds may already have left the correspondent account, so a
        // stuck confirmation never rolls back on its own
        (Sent, ConfirmStuck) => Sent,

        // Invalid transitions, including anything out of a terminal
        // state, stay where they are
        _ => current,
    }
}
