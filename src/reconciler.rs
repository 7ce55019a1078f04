//! Incoming Transfer Reconciler
//!
//! Credits inbound correspondent transfers to local accounts. Each
//! incoming entry applies at most once, keyed by its external transfer
//! id; the dedupe marker and the ledger credit commit inside one
//! critical section, so replaying an entry can never double-credit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use uuid::Uuid;

use crate::errors::TransferError;
use crate::gateway::{CorrespondentGateway, IncomingTransfer};
use crate::ledger::Ledger;
use crate::transfer::store::TransferStore;
use crate::transfer::types::{Destination, TransferKind, TransferRecord};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Poll interval for the background loop (ms)
    pub poll_interval_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
        }
    }
}

/// Outcome of one polling pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub polled: usize,
    pub credited: usize,
    pub duplicates: usize,
    pub unmatched: usize,
}

/// What happened to an external id we have already seen
#[derive(Debug, Clone)]
enum ReconcileMark {
    Credited { record_id: Uuid },
    Unmatched,
}

enum Applied {
    Credited(TransferRecord),
    Duplicate,
    Unmatched,
}

pub struct Reconciler {
    gateway: Arc<dyn CorrespondentGateway>,
    ledger: Arc<Ledger>,
    store: Arc<dyn TransferStore>,
    seen: Mutex<HashMap<String, ReconcileMark>>,
    unmatched: Mutex<Vec<IncomingTransfer>>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<dyn CorrespondentGateway>,
        ledger: Arc<Ledger>,
        store: Arc<dyn TransferStore>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            gateway,
            ledger,
            store,
            seen: Mutex::new(HashMap::new()),
            unmatched: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Poll the gateway once and apply every entry.
    pub async fn run_once(&self) -> Result<ReconcileStats, TransferError> {
        let entries = self
            .gateway
            .poll_incoming()
            .await
            .map_err(|e| e.into_transfer_error("poll_incoming"))?;

        let mut stats = ReconcileStats {
            polled: entries.len(),
            ..Default::default()
        };

        for entry in &entries {
            match self.apply(entry) {
                Applied::Credited(record) => {
                    stats.credited += 1;
                    // The dedupe marker already guards the credit; a
                    // store failure here only costs the audit row
                    if let Err(e) = self.store.create(&record).await {
                        log::error!("Failed to persist receive record {}: {}", record.id, e);
                    }
                    log::info!(
                        "Credited incoming transfer {} ({} {} -> {:?})",
                        entry.external_id,
                        entry.amount,
                        entry.currency.as_str(),
                        record.destination
                    );
                }
                Applied::Duplicate => stats.duplicates += 1,
                Applied::Unmatched => stats.unmatched += 1,
            }
        }

        if stats.polled > 0 {
            log::info!(
                "Reconcile pass: {} polled, {} credited, {} duplicates, {} unmatched",
                stats.polled,
                stats.credited,
                stats.duplicates,
                stats.unmatched
            );
        }
        Ok(stats)
    }

    /// Dedupe, resolve, and credit one entry. The seen-map lock spans
    /// the ledger credit (both are synchronous), so a marker without its
    /// credit, or the reverse, is impossible.
    fn apply(&self, entry: &IncomingTransfer) -> Applied {
        let mut seen = self.seen.lock().unwrap();
        if seen.contains_key(&entry.external_id) {
            log::debug!("Incoming transfer {} already reconciled", entry.external_id);
            return Applied::Duplicate;
        }

        let account_id = match self.ledger.find_by_correspondent(&entry.destination_account) {
            Some(id) => id,
            None => {
                log::warn!(
                    "Incoming transfer {} has no local account for {}",
                    entry.external_id,
                    entry.destination_account
                );
                seen.insert(entry.external_id.clone(), ReconcileMark::Unmatched);
                self.unmatched.lock().unwrap().push(entry.clone());
                return Applied::Unmatched;
            }
        };

        if let Err(e) = self.ledger.credit(account_id, entry.amount) {
            // A refused credit is parked with the unmatched entries
            log::warn!(
                "Ledger refused credit for incoming transfer {}: {}",
                entry.external_id,
                e
            );
            seen.insert(entry.external_id.clone(), ReconcileMark::Unmatched);
            self.unmatched.lock().unwrap().push(entry.clone());
            return Applied::Unmatched;
        }

        let record = TransferRecord::completed(
            TransferKind::Receive,
            entry.amount,
            entry.currency,
            None,
            Some(Destination::Internal(account_id)),
        );
        seen.insert(
            entry.external_id.clone(),
            ReconcileMark::Credited { record_id: record.id },
        );
        Applied::Credited(record)
    }

    /// Apply one pushed entry (webhook path). Duplicates surface as
    /// `ReconciliationConflict` so the push origin can tell the no-op
    /// apart from a fresh credit.
    pub async fn apply_pushed(&self, entry: &IncomingTransfer) -> Result<Uuid, TransferError> {
        match self.apply(entry) {
            Applied::Credited(record) => {
                let record_id = record.id;
                if let Err(e) = self.store.create(&record).await {
                    log::error!("Failed to persist receive record {}: {}", record_id, e);
                }
                log::info!(
                    "Credited pushed incoming transfer {} -> record {}",
                    entry.external_id,
                    record_id
                );
                Ok(record_id)
            }
            Applied::Duplicate => Err(TransferError::ReconciliationConflict(
                entry.external_id.clone(),
            )),
            Applied::Unmatched => Err(TransferError::InvalidDestination(format!(
                "no local account for {}",
                entry.destination_account
            ))),
        }
    }

    /// Incoming entries with no local account, for the operator surface.
    pub fn unmatched(&self) -> Vec<IncomingTransfer> {
        self.unmatched.lock().unwrap().clone()
    }

    /// Record id credited for an external transfer id, if any.
    pub fn find_reconciled(&self, external_id: &str) -> Option<Uuid> {
        match self.seen.lock().unwrap().get(external_id) {
            Some(ReconcileMark::Credited { record_id }) => Some(*record_id),
            _ => None,
        }
    }

    /// Background polling loop. A push notification can short-circuit
    /// the wait by calling `run_once` directly.
    pub async fn run(&self) {
        log::info!(
            "Reconciler started (poll_interval={}ms, gateway={})",
            self.config.poll_interval_ms,
            self.gateway.name()
        );
        loop {
            if let Err(e) = self.run_once().await {
                log::error!("Reconcile pass failed: {}", e);
            }
            sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    /// Start the reconciler in a background task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }
}
