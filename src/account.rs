use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::TransferError;

pub type AccountId = u64;

/// Supported settlement currencies. FX conversion is out of scope, so a
/// transfer must match the account currency exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Chf,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Chf => "CHF",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Some(Currency::Usd),
            "EUR" => Some(Currency::Eur),
            "GBP" => Some(Currency::Gbp),
            "CHF" => Some(Currency::Chf),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccountStatus::Active),
            "suspended" => Some(AccountStatus::Suspended),
            "closed" => Some(AccountStatus::Closed),
            _ => None,
        }
    }
}

/// Balance and limit state for one account. All arithmetic lives here;
/// locking is the ledger's job, so callers mutate through a held lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Settlement account number at the correspondent bank.
    pub correspondent_number: String,
    pub currency: Currency,
    pub balance: Decimal,
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    pub daily_used: Decimal,
    pub monthly_used: Decimal,
    pub status: AccountStatus,
    pub version: u64,
}

impl Account {
    pub fn new(
        id: AccountId,
        correspondent_number: &str,
        currency: Currency,
        balance: Decimal,
        daily_limit: Decimal,
        monthly_limit: Decimal,
    ) -> Self {
        Self {
            id,
            correspondent_number: correspondent_number.to_string(),
            currency,
            balance,
            daily_limit,
            monthly_limit,
            daily_used: Decimal::ZERO,
            monthly_used: Decimal::ZERO,
            status: AccountStatus::Active,
            version: 0,
        }
    }

    /// Debit the balance and consume limit headroom in one step. The
    /// account must be Active and keep a non-negative balance.
    pub fn reserve(&mut self, amount: Decimal) -> Result<(), TransferError> {
        if self.status != AccountStatus::Active {
            return Err(TransferError::AccountNotActive {
                account_id: self.id,
                status: self.status.as_str().to_string(),
            });
        }
        if self.balance < amount {
            return Err(TransferError::InsufficientFunds {
                available: self.balance,
                required: amount,
            });
        }
        if self.daily_used + amount > self.daily_limit {
            return Err(TransferError::DailyLimitExceeded {
                used: self.daily_used,
                limit: self.daily_limit,
                requested: amount,
            });
        }
        if self.monthly_used + amount > self.monthly_limit {
            return Err(TransferError::MonthlyLimitExceeded {
                used: self.monthly_used,
                limit: self.monthly_limit,
                requested: amount,
            });
        }
        self.balance -= amount;
        self.daily_used += amount;
        self.monthly_used += amount;
        self.version += 1;
        Ok(())
    }

    /// Incoming funds are accepted unless the account is closed.
    pub fn credit(&mut self, amount: Decimal) -> Result<(), TransferError> {
        if self.status == AccountStatus::Closed {
            return Err(TransferError::AccountNotActive {
                account_id: self.id,
                status: self.status.as_str().to_string(),
            });
        }
        self.balance += amount;
        self.version += 1;
        Ok(())
    }

    /// Inverse of `reserve`. Counters clamp at zero so a release landing
    /// after a scheduled reset never drives them negative.
    pub fn release(&mut self, amount: Decimal) {
        self.balance += amount;
        self.daily_used = std::cmp::max(self.daily_used - amount, Decimal::ZERO);
        self.monthly_used = std::cmp::max(self.monthly_used - amount, Decimal::ZERO);
        self.version += 1;
    }

    pub fn reset_daily(&mut self) {
        self.daily_used = Decimal::ZERO;
        self.version += 1;
    }

    pub fn reset_monthly(&mut self) {
        self.monthly_used = Decimal::ZERO;
        self.version += 1;
    }
}
