//! Correspondent gateway boundary
//!
//! The external correspondent-banking system is reachable only through a
//! best-effort HTTP API. This module defines the adapter trait, the
//! transport error classes, and the normalized response types. Retry
//! policy lives with the orchestrator; adapters only classify.

pub mod http;
pub mod mock;
pub mod normalize;

pub use http::HttpGateway;
pub use mock::MockGateway;

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Currency;
use crate::errors::TransferError;

/// Reservation issued by the correspondent for one in-flight transfer.
/// The code doubles as the idempotency token for every later step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub code: String,
    pub account_holder: Option<String>,
    pub currency: Option<Currency>,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub external_reference: String,
    pub confirmed_at: i64,
}

/// One inbound transfer as reported by the receiving endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingTransfer {
    pub external_id: String,
    pub destination_account: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub sender: Option<String>,
    pub timestamp: i64,
}

/// Transport-level error classes
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Timeout, connection failure, or 5xx. Safe to retry.
    Transient(String),
    /// 4xx. A permanent validation failure, never retried.
    Permanent(String),
    /// 2xx body that normalization could not interpret.
    Malformed(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }

    pub fn into_transfer_error(self, operation: &str) -> TransferError {
        match self {
            GatewayError::Transient(reason) => TransferError::GatewayTransient {
                operation: operation.to_string(),
                reason,
            },
            GatewayError::Permanent(reason) => TransferError::GatewayPermanent {
                operation: operation.to_string(),
                reason,
            },
            GatewayError::Malformed(reason) => TransferError::MalformedGatewayResponse {
                operation: operation.to_string(),
                reason,
            },
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transient(msg) => write!(f, "transient gateway error: {}", msg),
            GatewayError::Permanent(msg) => write!(f, "permanent gateway error: {}", msg),
            GatewayError::Malformed(msg) => write!(f, "malformed gateway response: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

/// The four correspondent operations, mapped 1:1 to external endpoints.
/// Implementations carry no business logic.
#[async_trait]
pub trait CorrespondentGateway: Send + Sync {
    /// Reserve an outbound transfer slot against a settlement account.
    async fn reserve(&self, account_number: &str) -> Result<Reservation, GatewayError>;

    /// Hand the funds to the correspondent. Idempotent per reservation
    /// code by contract.
    async fn send(
        &self,
        reservation_code: &str,
        destination: &str,
        amount: Decimal,
        currency: Currency,
    ) -> Result<(), GatewayError>;

    /// Confirm a sent transfer. Idempotent per reservation code by
    /// contract.
    async fn confirm(&self, reservation_code: &str) -> Result<Confirmation, GatewayError>;

    /// Fetch inbound transfers waiting on the correspondent side.
    async fn poll_incoming(&self) -> Result<Vec<IncomingTransfer>, GatewayError>;

    /// Adapter name for logging
    fn name(&self) -> &str;
}
