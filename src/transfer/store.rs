//! Transaction record store
//!
//! Narrow repository boundary between the saga and storage. Conditional
//! updates return an applied flag so concurrent steppers and
//! cancellation race safely; reservation codes are unique for the
//! lifetime of the store.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::account::AccountId;
use crate::transfer::state::TransferStatus;
use crate::transfer::types::{Destination, TransferRecord};

#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn create(&self, record: &TransferRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<TransferRecord>>;

    /// Conditional status update (returns true if applied). Records in a
    /// terminal status never change.
    async fn update_status_if(
        &self,
        id: Uuid,
        expected: TransferStatus,
        new_status: TransferStatus,
    ) -> Result<bool>;

    /// Conditional status update that also records the failure reason.
    async fn update_status_with_error(
        &self,
        id: Uuid,
        expected: TransferStatus,
        new_status: TransferStatus,
        error: &str,
    ) -> Result<bool>;

    /// Bind a reservation code to the record. Returns false when the
    /// record already carries a code (a raced assignment, benign); a
    /// code already bound to a different record is an error.
    async fn assign_reservation_code(&self, id: Uuid, code: &str) -> Result<bool>;

    async fn find_by_reservation_code(&self, code: &str) -> Result<Option<TransferRecord>>;

    async fn set_external_reference(
        &self,
        id: Uuid,
        reference: &str,
        confirmed_at: i64,
    ) -> Result<()>;

    /// One-shot claim of the send step: succeeds only for a Reserved
    /// record whose send was never attempted. After a successful claim,
    /// `try_cancel` can no longer win.
    async fn begin_send(&self, id: Uuid) -> Result<bool>;

    /// Cancel a Reserved record whose send was never attempted.
    async fn try_cancel(&self, id: Uuid) -> Result<bool>;

    /// Read-only records for one account, newest first.
    async fn list_by_account(&self, account_id: AccountId, limit: usize)
        -> Result<Vec<TransferRecord>>;

    /// Records resting in Sent, awaiting manual reconciliation.
    async fn find_unconfirmed(&self) -> Result<Vec<TransferRecord>>;
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<Uuid, TransferRecord>,
    by_reservation: HashMap<String, Uuid>,
}

/// In-memory store. A single mutex is enough here; every operation is a
/// short map access.
#[derive(Default)]
pub struct MemoryTransferStore {
    inner: Mutex<StoreInner>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn create(&self, record: &TransferRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.records.contains_key(&record.id) {
            bail!("transfer {} already exists", record.id);
        }
        if let Some(code) = &record.reservation_code {
            if inner.by_reservation.contains_key(code) {
                bail!("reservation code {} already bound", code);
            }
            inner.by_reservation.insert(code.clone(), record.id);
        }
        inner.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<TransferRecord>> {
        Ok(self.inner.lock().unwrap().records.get(&id).cloned())
    }

    async fn update_status_if(
        &self,
        id: Uuid,
        expected: TransferStatus,
        new_status: TransferStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let record = match inner.records.get_mut(&id) {
            Some(r) => r,
            None => bail!("transfer {} not found", id),
        };
        if record.status.is_terminal() || record.status != expected {
            return Ok(false);
        }
        let now = Utc::now().timestamp_millis();
        record.status = new_status;
        record.updated_at = now;
        if new_status.is_terminal() && record.completed_at.is_none() {
            record.completed_at = Some(now);
        }
        Ok(true)
    }

    async fn update_status_with_error(
        &self,
        id: Uuid,
        expected: TransferStatus,
        new_status: TransferStatus,
        error: &str,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let record = match inner.records.get_mut(&id) {
            Some(r) => r,
            None => bail!("transfer {} not found", id),
        };
        if record.status.is_terminal() || record.status != expected {
            return Ok(false);
        }
        let now = Utc::now().timestamp_millis();
        record.status = new_status;
        record.failure_reason = Some(error.to_string());
        record.updated_at = now;
        if new_status.is_terminal() && record.completed_at.is_none() {
            record.completed_at = Some(now);
        }
        Ok(true)
    }

    async fn assign_reservation_code(&self, id: Uuid, code: &str) -> Result<bool> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        match inner.by_reservation.get(code) {
            Some(owner) if *owner != id => {
                bail!("reservation code {} already bound to transfer {}", code, owner)
            }
            _ => {}
        }
        let record = match inner.records.get_mut(&id) {
            Some(r) => r,
            None => bail!("transfer {} not found", id),
        };
        if record.reservation_code.is_some() {
            return Ok(false);
        }
        record.reservation_code = Some(code.to_string());
        record.updated_at = Utc::now().timestamp_millis();
        inner.by_reservation.insert(code.to_string(), id);
        Ok(true)
    }

    async fn find_by_reservation_code(&self, code: &str) -> Result<Option<TransferRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .by_reservation
            .get(code)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn set_external_reference(
        &self,
        id: Uuid,
        reference: &str,
        confirmed_at: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let record = match inner.records.get_mut(&id) {
            Some(r) => r,
            None => bail!("transfer {} not found", id),
        };
        record.external_reference = Some(reference.to_string());
        record.completed_at = Some(confirmed_at);
        record.updated_at = Utc::now().timestamp_millis();
        Ok(())
    }

    async fn begin_send(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let record = match inner.records.get_mut(&id) {
            Some(r) => r,
            None => bail!("transfer {} not found", id),
        };
        if record.status != TransferStatus::Reserved || record.send_attempted {
            return Ok(false);
        }
        record.send_attempted = true;
        record.updated_at = Utc::now().timestamp_millis();
        Ok(true)
    }

    async fn try_cancel(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let record = match inner.records.get_mut(&id) {
            Some(r) => r,
            None => bail!("transfer {} not found", id),
        };
        if record.status != TransferStatus::Reserved || record.send_attempted {
            return Ok(false);
        }
        let now = Utc::now().timestamp_millis();
        record.status = TransferStatus::Cancelled;
        record.updated_at = now;
        record.completed_at = Some(now);
        Ok(true)
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<TransferRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<TransferRecord> = inner
            .records
            .values()
            .filter(|r| {
                r.source == Some(account_id)
                    || r.destination == Some(Destination::Internal(account_id))
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn find_unconfirmed(&self) -> Result<Vec<TransferRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<TransferRecord> = inner
            .records
            .values()
            .filter(|r| r.status == TransferStatus::Sent)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Currency;
    use crate::transfer::types::TransferKind;
    use rust_decimal::Decimal;

    fn record() -> TransferRecord {
        TransferRecord::new(
            TransferKind::Transfer,
            Decimal::from(100),
            Currency::Usd,
            Some(4001),
            Some(Destination::External("EXT-1".to_string())),
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryTransferStore::new();
        let rec = record();
        store.create(&rec).await.unwrap();

        let loaded = store.get(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TransferStatus::Pending);
        assert!(store.create(&rec).await.is_err());
    }

    #[tokio::test]
    async fn test_conditional_update_applies_once() {
        let store = MemoryTransferStore::new();
        let rec = record();
        store.create(&rec).await.unwrap();

        assert!(store
            .update_status_if(rec.id, TransferStatus::Pending, TransferStatus::Reserved)
            .await
            .unwrap());
        // Second caller with the stale expectation loses
        assert!(!store
            .update_status_if(rec.id, TransferStatus::Pending, TransferStatus::Reserved)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_terminal_records_are_immutable() {
        let store = MemoryTransferStore::new();
        let rec = record();
        store.create(&rec).await.unwrap();

        store
            .update_status_with_error(rec.id, TransferStatus::Pending, TransferStatus::Failed, "no")
            .await
            .unwrap();

        assert!(!store
            .update_status_if(rec.id, TransferStatus::Failed, TransferStatus::Completed)
            .await
            .unwrap());
        let loaded = store.get(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TransferStatus::Failed);
        assert_eq!(loaded.failure_reason.as_deref(), Some("no"));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_reservation_code_uniqueness() {
        let store = MemoryTransferStore::new();
        let a = record();
        let b = record();
        store.create(&a).await.unwrap();
        store.create(&b).await.unwrap();

        assert!(store.assign_reservation_code(a.id, "RSV-1").await.unwrap());
        // Same code on another record is refused outright
        assert!(store.assign_reservation_code(b.id, "RSV-1").await.is_err());
        // Re-assigning the holder is a benign no-op
        assert!(!store.assign_reservation_code(a.id, "RSV-2").await.unwrap());

        let found = store.find_by_reservation_code("RSV-1").await.unwrap().unwrap();
        assert_eq!(found.id, a.id);
        assert!(store.find_by_reservation_code("RSV-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_begin_send_and_cancel_gate() {
        let store = MemoryTransferStore::new();
        let rec = record();
        store.create(&rec).await.unwrap();
        store
            .update_status_if(rec.id, TransferStatus::Pending, TransferStatus::Reserved)
            .await
            .unwrap();

        // Send claims first; cancel must lose
        assert!(store.begin_send(rec.id).await.unwrap());
        assert!(!store.begin_send(rec.id).await.unwrap());
        assert!(!store.try_cancel(rec.id).await.unwrap());
        assert_eq!(
            store.get(rec.id).await.unwrap().unwrap().status,
            TransferStatus::Reserved
        );
    }

    #[tokio::test]
    async fn test_cancel_before_send() {
        let store = MemoryTransferStore::new();
        let rec = record();
        store.create(&rec).await.unwrap();
        store
            .update_status_if(rec.id, TransferStatus::Pending, TransferStatus::Reserved)
            .await
            .unwrap();

        assert!(store.try_cancel(rec.id).await.unwrap());
        // Send arriving after cancel is refused
        assert!(!store.begin_send(rec.id).await.unwrap());
        assert_eq!(
            store.get(rec.id).await.unwrap().unwrap().status,
            TransferStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_list_by_account_and_unconfirmed() {
        let store = MemoryTransferStore::new();
        let mut a = record();
        a.source = Some(7001);
        let mut b = record();
        b.source = Some(7001);
        b.created_at += 10;
        let mut other = record();
        other.source = Some(7002);
        store.create(&a).await.unwrap();
        store.create(&b).await.unwrap();
        store.create(&other).await.unwrap();

        let listed = store.list_by_account(7001, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id); // newest first

        store
            .update_status_if(a.id, TransferStatus::Pending, TransferStatus::Reserved)
            .await
            .unwrap();
        store
            .update_status_if(a.id, TransferStatus::Reserved, TransferStatus::Sent)
            .await
            .unwrap();

        let unconfirmed = store.find_unconfirmed().await.unwrap();
        assert_eq!(unconfirmed.len(), 1);
        assert_eq!(unconfirmed[0].id, a.id);
    }
}
