//! Limit Enforcer
//!
//! Zeroes the daily/monthly running totals. Driven by an external
//! scheduler through the admin routes; never called from the transfer
//! path.

use std::sync::Arc;

use crate::ledger::Ledger;

pub struct LimitEnforcer {
    ledger: Arc<Ledger>,
}

impl LimitEnforcer {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    pub fn reset_daily(&self) -> usize {
        let count = self.ledger.reset_daily();
        log::info!("Daily transfer limits reset for {} accounts", count);
        count
    }

    pub fn reset_monthly(&self) -> usize {
        let count = self.ledger.reset_monthly();
        log::info!("Monthly transfer limits reset for {} accounts", count);
        count
    }
}
