//! Core types for the transfer saga

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::{AccountId, Currency};
use crate::transfer::state::TransferStatus;

/// Kind of ledger movement a record documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Deposit,
    Withdrawal,
    Transfer,
    Reservation,
    Confirmation,
    Receive,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Deposit => "deposit",
            TransferKind::Withdrawal => "withdrawal",
            TransferKind::Transfer => "transfer",
            TransferKind::Reservation => "reservation",
            TransferKind::Confirmation => "confirmation",
            TransferKind::Receive => "receive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransferKind::Deposit),
            "withdrawal" => Some(TransferKind::Withdrawal),
            "transfer" => Some(TransferKind::Transfer),
            "reservation" => Some(TransferKind::Reservation),
            "confirmation" => Some(TransferKind::Confirmation),
            "receive" => Some(TransferKind::Receive),
            _ => None,
        }
    }
}

/// Where the money goes: another ledger account, or an account number at
/// the correspondent bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Internal(AccountId),
    External(String),
}

impl Destination {
    pub fn is_internal(&self) -> bool {
        matches!(self, Destination::Internal(_))
    }
}

/// Request to move funds out of a local account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source: AccountId,
    pub destination: Destination,
    pub amount: Decimal,
    pub currency: Currency,
}

/// Transfer record as persisted in the transaction store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: Uuid,
    pub kind: TransferKind,
    pub amount: Decimal,
    pub currency: Currency,
    pub source: Option<AccountId>,
    pub destination: Option<Destination>,
    pub status: TransferStatus,
    /// Idempotency token across all gateway calls; unique per record for
    /// the lifetime of the store once assigned.
    pub reservation_code: Option<String>,
    /// Set only after a successful confirmation.
    pub external_reference: Option<String>,
    pub failure_reason: Option<String>,
    /// Once true, cancellation is refused for good.
    pub send_attempted: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl TransferRecord {
    pub fn new(
        kind: TransferKind,
        amount: Decimal,
        currency: Currency,
        source: Option<AccountId>,
        destination: Option<Destination>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            kind,
            amount,
            currency,
            source,
            destination,
            status: TransferStatus::Pending,
            reservation_code: None,
            external_reference: None,
            failure_reason: None,
            send_attempted: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Record for a movement that settles in one step (deposits,
    /// withdrawals, receives, internal mirrors).
    pub fn completed(
        kind: TransferKind,
        amount: Decimal,
        currency: Currency,
        source: Option<AccountId>,
        destination: Option<Destination>,
    ) -> Self {
        let mut record = Self::new(kind, amount, currency, source, destination);
        record.status = TransferStatus::Completed;
        record.completed_at = Some(record.created_at);
        record
    }
}

/// Response shape returned by the HTTP layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub reservation_code: Option<String>,
    pub external_reference: Option<String>,
    pub failure_reason: Option<String>,
}

impl From<&TransferRecord> for TransferResponse {
    fn from(record: &TransferRecord) -> Self {
        Self {
            id: record.id.to_string(),
            kind: record.kind.as_str().to_string(),
            status: record.status.as_str().to_string(),
            amount: record.amount,
            currency: record.currency.as_str().to_string(),
            reservation_code: record.reservation_code.clone(),
            external_reference: record.external_reference.clone(),
            failure_reason: record.failure_reason.clone(),
        }
    }
}
