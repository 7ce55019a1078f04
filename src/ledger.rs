//! Account Ledger
//!
//! Authoritative store of balances and transfer-limit counters. Every
//! mutation is serialized per account through a per-account lock held
//! only across the arithmetic, never across an await; accounts never
//! share a lock, so transfers on two different accounts proceed fully
//! in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use rust_decimal::Decimal;

use crate::account::{Account, AccountId};
use crate::errors::TransferError;

#[derive(Default)]
pub struct Ledger {
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<Account>>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Provisioning seam. Account creation itself belongs to the
    /// account-management module; the ledger only takes custody.
    pub fn register(&self, account: Account) -> Result<(), TransferError> {
        let mut accounts = self.accounts.write().unwrap();
        if accounts.contains_key(&account.id) {
            return Err(TransferError::StoreError(format!(
                "account {} already registered",
                account.id
            )));
        }
        accounts.insert(account.id, Arc::new(Mutex::new(account)));
        Ok(())
    }

    /// Point-in-time snapshot of one account.
    pub fn get(&self, account_id: AccountId) -> Result<Account, TransferError> {
        let cell = self.cell(account_id)?;
        let account = cell.lock().unwrap();
        Ok(account.clone())
    }

    /// Resolve a correspondent settlement number to a local account.
    pub fn find_by_correspondent(&self, number: &str) -> Option<AccountId> {
        let accounts = self.accounts.read().unwrap();
        for (id, cell) in accounts.iter() {
            if cell.lock().unwrap().correspondent_number == number {
                return Some(*id);
            }
        }
        None
    }

    /// Verify balance and both limits, then debit and count, all inside
    /// one per-account critical section. The only mutation path that
    /// removes funds.
    pub fn reserve_limit(&self, account_id: AccountId, amount: Decimal) -> Result<(), TransferError> {
        check_amount(amount)?;
        let cell = self.cell(account_id)?;
        let mut account = cell.lock().unwrap();
        account.reserve(amount)
    }

    pub fn credit(&self, account_id: AccountId, amount: Decimal) -> Result<(), TransferError> {
        check_amount(amount)?;
        let cell = self.cell(account_id)?;
        let mut account = cell.lock().unwrap();
        account.credit(amount)
    }

    /// Compensating inverse of `reserve_limit`: restores the balance and
    /// gives the limit headroom back.
    pub fn release(&self, account_id: AccountId, amount: Decimal) -> Result<(), TransferError> {
        check_amount(amount)?;
        let cell = self.cell(account_id)?;
        let mut account = cell.lock().unwrap();
        account.release(amount);
        Ok(())
    }

    /// Zero the daily running totals for every account. Returns how many
    /// accounts were reset.
    pub fn reset_daily(&self) -> usize {
        let accounts = self.accounts.read().unwrap();
        for cell in accounts.values() {
            cell.lock().unwrap().reset_daily();
        }
        accounts.len()
    }

    pub fn reset_monthly(&self) -> usize {
        let accounts = self.accounts.read().unwrap();
        for cell in accounts.values() {
            cell.lock().unwrap().reset_monthly();
        }
        accounts.len()
    }

    fn cell(&self, account_id: AccountId) -> Result<Arc<Mutex<Account>>, TransferError> {
        self.accounts
            .read()
            .unwrap()
            .get(&account_id)
            .cloned()
            .ok_or(TransferError::AccountNotFound(account_id))
    }
}

fn check_amount(amount: Decimal) -> Result<(), TransferError> {
    if amount <= Decimal::ZERO {
        return Err(TransferError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}
