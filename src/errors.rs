// Error taxonomy for the transfer core
use std::fmt;

use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub enum TransferError {
    // Validation errors (synchronous, no side effects)
    InvalidAmount(String),
    InvalidDestination(String),
    CurrencyMismatch { account: String, requested: String },
    SameAccount,
    AccountNotFound(u64),
    AccountNotActive { account_id: u64, status: String },
    InsufficientFunds { available: Decimal, required: Decimal },
    DailyLimitExceeded { used: Decimal, limit: Decimal, requested: Decimal },
    MonthlyLimitExceeded { used: Decimal, limit: Decimal, requested: Decimal },

    // Gateway errors
    GatewayTransient { operation: String, reason: String },
    GatewayPermanent { operation: String, reason: String },
    MalformedGatewayResponse { operation: String, reason: String },

    // State errors
    ReservationConflict(String),
    ReconciliationConflict(String),
    ConcurrencyConflict(String),
    CancellationNotAllowed { status: String },
    TransferNotFound(String),

    // Storage errors
    StoreError(String),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),
            Self::InvalidDestination(msg) => write!(f, "Invalid destination: {}", msg),
            Self::CurrencyMismatch { account, requested } => {
                write!(f, "Currency mismatch: account holds {}, requested {}", account, requested)
            }
            Self::SameAccount => write!(f, "Source and destination cannot be the same account"),
            Self::AccountNotFound(id) => write!(f, "Account {} not found", id),
            Self::AccountNotActive { account_id, status } => {
                write!(f, "Account {} is {}", account_id, status)
            }
            Self::InsufficientFunds { available, required } => {
                write!(f, "Insufficient funds: have {}, need {}", available, required)
            }
            Self::DailyLimitExceeded { used, limit, requested } => {
                write!(f, "Daily limit exceeded: {} used of {}, requested {}", used, limit, requested)
            }
            Self::MonthlyLimitExceeded { used, limit, requested } => {
                write!(f, "Monthly limit exceeded: {} used of {}, requested {}", used, limit, requested)
            }
            Self::GatewayTransient { operation, reason } => {
                write!(f, "Gateway {} failed (transient): {}", operation, reason)
            }
            Self::GatewayPermanent { operation, reason } => {
                write!(f, "Gateway {} rejected: {}", operation, reason)
            }
            Self::MalformedGatewayResponse { operation, reason } => {
                write!(f, "Gateway {} returned an unreadable response: {}", operation, reason)
            }
            Self::ReservationConflict(code) => {
                write!(f, "Reservation code {} is already bound to another transfer", code)
            }
            Self::ReconciliationConflict(id) => {
                write!(f, "Incoming transfer {} was already reconciled", id)
            }
            Self::ConcurrencyConflict(msg) => write!(f, "Concurrent update conflict: {}", msg),
            Self::CancellationNotAllowed { status } => {
                write!(f, "Cancellation not allowed in status {}", status)
            }
            Self::TransferNotFound(id) => write!(f, "Transfer {} not found", id),
            Self::StoreError(msg) => write!(f, "Transaction store error: {}", msg),
        }
    }
}

impl std::error::Error for TransferError {}

// Error code mapping for API responses
impl TransferError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InvalidDestination(_) => "INVALID_DESTINATION",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::SameAccount => "SAME_ACCOUNT",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::AccountNotActive { .. } => "ACCOUNT_NOT_ACTIVE",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::DailyLimitExceeded { .. } => "DAILY_LIMIT_EXCEEDED",
            Self::MonthlyLimitExceeded { .. } => "MONTHLY_LIMIT_EXCEEDED",
            Self::GatewayTransient { .. } => "GATEWAY_UNAVAILABLE",
            Self::GatewayPermanent { .. } => "GATEWAY_REJECTED",
            Self::MalformedGatewayResponse { .. } => "GATEWAY_MALFORMED_RESPONSE",
            Self::ReservationConflict(_) => "RESERVATION_CONFLICT",
            Self::ReconciliationConflict(_) => "RECONCILIATION_CONFLICT",
            Self::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            Self::CancellationNotAllowed { .. } => "CANCELLATION_NOT_ALLOWED",
            Self::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            Self::StoreError(_) => "STORE_ERROR",
        }
    }

    /// Safe for the caller to retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayTransient { .. } | Self::ConcurrencyConflict(_)
        )
    }

    /// Caused by the request, not by the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::InvalidDestination(_)
                | Self::CurrencyMismatch { .. }
                | Self::SameAccount
                | Self::AccountNotFound(_)
                | Self::AccountNotActive { .. }
                | Self::InsufficientFunds { .. }
                | Self::DailyLimitExceeded { .. }
                | Self::MonthlyLimitExceeded { .. }
                | Self::CancellationNotAllowed { .. }
        )
    }
}
