//! Transfer Orchestrator
//!
//! Saga controller for cross-ledger transfers. Each step persists its
//! outcome through a conditional store update before the next step
//! runs; compensation refunds the reserved amount exactly once, tied to
//! the one update that entered the terminal state. The reservation code
//! issued in the first gateway step is the idempotency token for every
//! later call, so retries of any step are safe.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::sleep;
use uuid::Uuid;

use crate::account::{AccountId, AccountStatus};
use crate::errors::TransferError;
use crate::events::{AuditEvent, EventSink};
use crate::gateway::{CorrespondentGateway, GatewayError};
use crate::ledger::Ledger;
use crate::transfer::state::TransferStatus;
use crate::transfer::store::TransferStore;
use crate::transfer::types::{Destination, TransferKind, TransferRecord, TransferRequest};

/// Retry policy for gateway steps. Attempts are spaced exponentially
/// from `base_delay_ms`, capped at `max_delay_ms`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(exp.min(self.max_delay_ms))
    }
}

pub struct TransferOrchestrator {
    ledger: Arc<Ledger>,
    store: Arc<dyn TransferStore>,
    gateway: Arc<dyn CorrespondentGateway>,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
}

impl TransferOrchestrator {
    pub fn new(
        ledger: Arc<Ledger>,
        store: Arc<dyn TransferStore>,
        gateway: Arc<dyn CorrespondentGateway>,
        events: Arc<dyn EventSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            store,
            gateway,
            events,
            retry,
        }
    }

    /// Validate, reserve funds and limits, and persist a Pending record.
    /// Validation failures return synchronously and leave no trace.
    pub async fn submit(&self, req: TransferRequest) -> Result<TransferRecord, TransferError> {
        self.validate(&req)?;

        // The one mutation that removes funds. Everything after this
        // point either completes the saga or releases.
        self.ledger.reserve_limit(req.source, req.amount)?;

        let record = TransferRecord::new(
            TransferKind::Transfer,
            req.amount,
            req.currency,
            Some(req.source),
            Some(req.destination.clone()),
        );
        if let Err(e) = self.store.create(&record).await {
            self.release_or_alert(&record, req.source, req.amount);
            return Err(TransferError::StoreError(e.to_string()));
        }
        log::info!(
            "Created transfer {} ({} {} from account {})",
            record.id,
            record.amount,
            record.currency.as_str(),
            req.source
        );
        self.emit(record.id, None, TransferStatus::Pending, None).await;
        Ok(record)
    }

    /// Drive the saga until it reaches a terminal state or the
    /// documented Sent-and-unconfirmed resting point. Saga failures come
    /// back as an Ok record in Failed with its failure reason; an Err is
    /// a caller-level problem (unknown id, storage, lost race).
    pub async fn execute(&self, id: Uuid) -> Result<TransferRecord, TransferError> {
        loop {
            let record = self.load(id).await?;
            match record.status {
                TransferStatus::Pending => {
                    self.step_reserve(&record).await?;
                }
                TransferStatus::Reserved => {
                    let progressed = match &record.destination {
                        Some(Destination::Internal(_)) => self.step_local_credit(&record).await?,
                        _ => self.step_send(&record).await?,
                    };
                    if !progressed {
                        let current = self.load(id).await?;
                        if current.status == TransferStatus::Reserved {
                            return Err(TransferError::ConcurrencyConflict(format!(
                                "transfer {} is being processed by another worker",
                                id
                            )));
                        }
                        return Ok(current);
                    }
                }
                TransferStatus::Sent => {
                    self.step_confirm(&record).await?;
                    return self.load(id).await;
                }
                _ => return Ok(record),
            }
        }
    }

    /// Submit and run to completion in one call.
    pub async fn transfer(&self, req: TransferRequest) -> Result<TransferRecord, TransferError> {
        let record = self.submit(req).await?;
        self.execute(record.id).await
    }

    /// Cancel a reserved transfer. Allowed only before the first send
    /// attempt; the store enforces the gate atomically, so a cancel
    /// racing the send path cannot strand or duplicate funds.
    pub async fn cancel(&self, id: Uuid) -> Result<TransferRecord, TransferError> {
        let record = self.load(id).await?;
        let applied = self
            .store
            .try_cancel(id)
            .await
            .map_err(|e| TransferError::StoreError(e.to_string()))?;
        if !applied {
            let current = self.load(id).await?;
            return Err(TransferError::CancellationNotAllowed {
                status: current.status.as_str().to_string(),
            });
        }
        if let Some(source) = record.source {
            self.release_or_alert(&record, source, record.amount);
        }
        self.emit(id, Some(TransferStatus::Reserved), TransferStatus::Cancelled, None)
            .await;
        self.load(id).await
    }

    /// Local cash deposit: credit the account and record it.
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<TransferRecord, TransferError> {
        let account = self.ledger.get(account_id)?;
        self.ledger.credit(account_id, amount)?;

        let record = TransferRecord::completed(
            TransferKind::Deposit,
            amount,
            account.currency,
            None,
            Some(Destination::Internal(account_id)),
        );
        if let Err(e) = self.store.create(&record).await {
            // The credit stands; the missing audit row surfaces in the log
            log::error!("Failed to persist deposit record {}: {}", record.id, e);
        }
        self.emit(record.id, None, TransferStatus::Completed, Some("deposit".to_string()))
            .await;
        Ok(record)
    }

    /// Local cash withdrawal. Shares the daily/monthly limit counters
    /// with outbound transfers.
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<TransferRecord, TransferError> {
        let account = self.ledger.get(account_id)?;
        self.ledger.reserve_limit(account_id, amount)?;

        let record = TransferRecord::completed(
            TransferKind::Withdrawal,
            amount,
            account.currency,
            Some(account_id),
            None,
        );
        if let Err(e) = self.store.create(&record).await {
            self.release_or_alert(&record, account_id, amount);
            return Err(TransferError::StoreError(e.to_string()));
        }
        self.emit(record.id, None, TransferStatus::Completed, Some("withdrawal".to_string()))
            .await;
        Ok(record)
    }

    pub async fn status(&self, id: Uuid) -> Result<TransferRecord, TransferError> {
        self.load(id).await
    }

    /// Read-only records for the reporting module.
    pub async fn history(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        self.store
            .list_by_account(account_id, limit)
            .await
            .map_err(|e| TransferError::StoreError(e.to_string()))
    }

    /// Sent-but-unconfirmed transfers for the operator surface.
    pub async fn unconfirmed(&self) -> Result<Vec<TransferRecord>, TransferError> {
        self.store
            .find_unconfirmed()
            .await
            .map_err(|e| TransferError::StoreError(e.to_string()))
    }

    fn validate(&self, req: &TransferRequest) -> Result<(), TransferError> {
        if req.amount <= Decimal::ZERO {
            return Err(TransferError::InvalidAmount(format!(
                "transfer amount must be positive, got {}",
                req.amount
            )));
        }
        let source = self.ledger.get(req.source)?;
        if source.status != AccountStatus::Active {
            return Err(TransferError::AccountNotActive {
                account_id: source.id,
                status: source.status.as_str().to_string(),
            });
        }
        if source.currency != req.currency {
            return Err(TransferError::CurrencyMismatch {
                account: source.currency.as_str().to_string(),
                requested: req.currency.as_str().to_string(),
            });
        }
        match &req.destination {
            Destination::Internal(dest_id) => {
                if *dest_id == req.source {
                    return Err(TransferError::SameAccount);
                }
                let dest = self.ledger.get(*dest_id)?;
                if dest.status != AccountStatus::Active {
                    return Err(TransferError::AccountNotActive {
                        account_id: dest.id,
                        status: dest.status.as_str().to_string(),
                    });
                }
                if dest.currency != req.currency {
                    return Err(TransferError::CurrencyMismatch {
                        account: dest.currency.as_str().to_string(),
                        requested: req.currency.as_str().to_string(),
                    });
                }
            }
            Destination::External(number) => {
                if number.trim().is_empty() {
                    return Err(TransferError::InvalidDestination(
                        "external account number is empty".to_string(),
                    ));
                }
                if *number == source.correspondent_number {
                    return Err(TransferError::SameAccount);
                }
            }
        }
        Ok(())
    }

    /// Pending -> Reserved. External transfers obtain the reservation
    /// code here; internal transfers only flip the state.
    async fn step_reserve(&self, record: &TransferRecord) -> Result<(), TransferError> {
        if matches!(record.destination, Some(Destination::Internal(_))) {
            if self.cas(record.id, TransferStatus::Pending, TransferStatus::Reserved).await? {
                self.emit(
                    record.id,
                    Some(TransferStatus::Pending),
                    TransferStatus::Reserved,
                    Some("internal route".to_string()),
                )
                .await;
            }
            return Ok(());
        }

        let source_id = record.source.ok_or_else(|| {
            TransferError::StoreError(format!("transfer {} has no source account", record.id))
        })?;
        let source = self.ledger.get(source_id)?;

        match self
            .with_retry("reserve", || {
                self.gateway.reserve(&source.correspondent_number)
            })
            .await
        {
            Ok(reservation) => {
                match self
                    .store
                    .assign_reservation_code(record.id, &reservation.code)
                    .await
                {
                    Ok(true) | Ok(false) => {}
                    Err(e) => {
                        // The correspondent handed out a code that is
                        // already bound to another transfer; bail out
                        // before any funds move externally
                        log::error!("Reservation code conflict for {}: {}", record.id, e);
                        let conflict = TransferError::ReservationConflict(reservation.code.clone());
                        self.fail_with_compensation(record, TransferStatus::Pending, &conflict.to_string())
                            .await?;
                        return Ok(());
                    }
                }
                if self.cas(record.id, TransferStatus::Pending, TransferStatus::Reserved).await? {
                    self.emit(
                        record.id,
                        Some(TransferStatus::Pending),
                        TransferStatus::Reserved,
                        Some(format!("reservation {}", reservation.code)),
                    )
                    .await;
                }
                Ok(())
            }
            Err(e) => {
                self.fail_with_compensation(record, TransferStatus::Pending, &e.to_string())
                    .await
            }
        }
    }

    /// Reserved -> Sent for external transfers. Returns false if the
    /// send claim was lost (cancelled or taken by another worker).
    async fn step_send(&self, record: &TransferRecord) -> Result<bool, TransferError> {
        // Claim the step; from here cancellation is refused for good
        if !self
            .store
            .begin_send(record.id)
            .await
            .map_err(|e| TransferError::StoreError(e.to_string()))?
        {
            return Ok(false);
        }

        let code = record.reservation_code.clone().ok_or_else(|| {
            TransferError::StoreError(format!(
                "transfer {} reserved without a reservation code",
                record.id
            ))
        })?;
        let destination = match &record.destination {
            Some(Destination::External(number)) => number.clone(),
            _ => {
                return Err(TransferError::StoreError(format!(
                    "transfer {} has no external destination",
                    record.id
                )))
            }
        };

        match self
            .with_retry("send", || {
                self.gateway
                    .send(&code, &destination, record.amount, record.currency)
            })
            .await
        {
            Ok(()) => {
                if self.cas(record.id, TransferStatus::Reserved, TransferStatus::Sent).await? {
                    self.emit(
                        record.id,
                        Some(TransferStatus::Reserved),
                        TransferStatus::Sent,
                        None,
                    )
                    .await;
                }
                Ok(true)
            }
            Err(e) => {
                self.fail_with_compensation(record, TransferStatus::Reserved, &e.to_string())
                    .await?;
                Ok(true)
            }
        }
    }

    /// Reserved -> Completed for internal destinations: one local
    /// credit plus a mirrored deposit record for the receiving account.
    async fn step_local_credit(&self, record: &TransferRecord) -> Result<bool, TransferError> {
        // Same irrevocability gate as the external send
        if !self
            .store
            .begin_send(record.id)
            .await
            .map_err(|e| TransferError::StoreError(e.to_string()))?
        {
            return Ok(false);
        }

        let dest_id = match record.destination {
            Some(Destination::Internal(id)) => id,
            _ => {
                return Err(TransferError::StoreError(format!(
                    "transfer {} has no internal destination",
                    record.id
                )))
            }
        };

        match self.ledger.credit(dest_id, record.amount) {
            Ok(()) => {
                let mirror = TransferRecord::completed(
                    TransferKind::Deposit,
                    record.amount,
                    record.currency,
                    record.source,
                    Some(Destination::Internal(dest_id)),
                );
                if let Err(e) = self.store.create(&mirror).await {
                    log::error!(
                        "Failed to persist mirror deposit for {}: {}",
                        record.id,
                        e
                    );
                }
                if self
                    .cas(record.id, TransferStatus::Reserved, TransferStatus::Completed)
                    .await?
                {
                    self.emit(
                        record.id,
                        Some(TransferStatus::Reserved),
                        TransferStatus::Completed,
                        Some(format!("internal credit to account {}", dest_id)),
                    )
                    .await;
                }
                Ok(true)
            }
            Err(e) => {
                self.fail_with_compensation(record, TransferStatus::Reserved, &e.to_string())
                    .await?;
                Ok(true)
            }
        }
    }

    /// Sent -> Completed, or rest in Sent when confirmation stays
    /// unreachable. Funds may already have left the correspondent
    /// account, so this path never compensates.
    async fn step_confirm(&self, record: &TransferRecord) -> Result<(), TransferError> {
        let code = record.reservation_code.clone().ok_or_else(|| {
            TransferError::StoreError(format!(
                "transfer {} sent without a reservation code",
                record.id
            ))
        })?;

        match self.with_retry("confirm", || self.gateway.confirm(&code)).await {
            Ok(confirmation) => {
                self.store
                    .set_external_reference(
                        record.id,
                        &confirmation.external_reference,
                        confirmation.confirmed_at,
                    )
                    .await
                    .map_err(|e| TransferError::StoreError(e.to_string()))?;
                if self.cas(record.id, TransferStatus::Sent, TransferStatus::Completed).await? {
                    self.emit(
                        record.id,
                        Some(TransferStatus::Sent),
                        TransferStatus::Completed,
                        Some(format!("external reference {}", confirmation.external_reference)),
                    )
                    .await;
                }
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "Transfer {} sent but unconfirmed: {} (operator reconciliation required)",
                    record.id,
                    e
                );
                self.emit(
                    record.id,
                    Some(TransferStatus::Sent),
                    TransferStatus::Sent,
                    Some(format!("confirm failed: {}", e)),
                )
                .await;
                Ok(())
            }
        }
    }

    /// Move the record to Failed from `expected` and, if this call won
    /// the transition, release the reserved funds. Only one caller ever
    /// observes an applied update into the terminal state, so the
    /// release runs at most once per record.
    async fn fail_with_compensation(
        &self,
        record: &TransferRecord,
        expected: TransferStatus,
        reason: &str,
    ) -> Result<(), TransferError> {
        let applied = self
            .store
            .update_status_with_error(record.id, expected, TransferStatus::Failed, reason)
            .await
            .map_err(|e| TransferError::StoreError(e.to_string()))?;
        if !applied {
            return Ok(());
        }
        if let Some(source) = record.source {
            self.release_or_alert(record, source, record.amount);
        }
        self.emit(
            record.id,
            Some(expected),
            TransferStatus::Failed,
            Some(reason.to_string()),
        )
        .await;
        Ok(())
    }

    /// Retry wrapper for one gateway operation. Transient failures back
    /// off exponentially; a permanent failure or exhausted attempts
    /// surface as the corresponding error.
    async fn with_retry<T, Fut>(
        &self,
        operation: &'static str,
        mut call: impl FnMut() -> Fut,
    ) -> Result<T, TransferError>
    where
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    log::warn!(
                        "Gateway {} attempt {}/{} failed: {} (retrying)",
                        operation,
                        attempt,
                        self.retry.max_attempts,
                        e
                    );
                    sleep(self.retry.delay_for(attempt - 1)).await;
                }
                Err(e) => return Err(e.into_transfer_error(operation)),
            }
        }
    }

    async fn load(&self, id: Uuid) -> Result<TransferRecord, TransferError> {
        self.store
            .get(id)
            .await
            .map_err(|e| TransferError::StoreError(e.to_string()))?
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))
    }

    async fn cas(
        &self,
        id: Uuid,
        expected: TransferStatus,
        new_status: TransferStatus,
    ) -> Result<bool, TransferError> {
        self.store
            .update_status_if(id, expected, new_status)
            .await
            .map_err(|e| TransferError::StoreError(e.to_string()))
    }

    fn release_or_alert(&self, record: &TransferRecord, account_id: AccountId, amount: Decimal) {
        if let Err(e) = self.ledger.release(account_id, amount) {
            log::error!(
                "Compensation release failed for {} (account {}): {}",
                record.id,
                account_id,
                e
            );
        }
    }

    async fn emit(
        &self,
        id: Uuid,
        from: Option<TransferStatus>,
        to: TransferStatus,
        note: Option<String>,
    ) {
        let event = AuditEvent {
            transfer_id: id.to_string(),
            from_status: from.map(|s| s.as_str().to_string()),
            to_status: to.as_str().to_string(),
            note,
            ts_ms: Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.events.publish(event).await {
            log::warn!("Audit sink rejected event for {}: {}", id, e);
        }
    }
}
