// Concurrency properties of the account ledger.

use std::sync::Arc;

use rust_decimal::Decimal;

use crossledger::account::{Account, Currency};
use crossledger::ledger::Ledger;
use crossledger::limits::LimitEnforcer;

fn ledger_with_account(id: u64, balance: u64) -> Arc<Ledger> {
    let ledger = Arc::new(Ledger::new());
    ledger
        .register(Account::new(
            id,
            &format!("CORR-{}", id),
            Currency::Usd,
            Decimal::from(balance),
            Decimal::from(1_000_000),
            Decimal::from(10_000_000),
        ))
        .unwrap();
    ledger
}

// The sum of successfully reserved amounts never exceeds the starting
// balance, whatever the interleaving.
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_reserves_never_overdraw() {
    let ledger = ledger_with_account(1, 1000);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.reserve_limit(1, Decimal::from(100))
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 10);
    let account = ledger.get(1).unwrap();
    assert_eq!(account.balance, Decimal::ZERO);
    assert_eq!(account.daily_used, Decimal::from(1000));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_mixed_amounts_stay_consistent() {
    let ledger = ledger_with_account(1, 400);

    let amounts: Vec<u64> = vec![50, 120, 300, 90, 250, 75, 40, 110];
    let mut handles = Vec::new();
    for amount in amounts {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .reserve_limit(1, Decimal::from(amount))
                .map(|_| amount)
        }));
    }

    let mut reserved_total = 0u64;
    for handle in handles {
        if let Ok(amount) = handle.await.unwrap() {
            reserved_total += amount;
        }
    }

    assert!(reserved_total <= 400);
    let account = ledger.get(1).unwrap();
    assert_eq!(account.balance, Decimal::from(400 - reserved_total));
    assert_eq!(account.daily_used, Decimal::from(reserved_total));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_credits_all_land() {
    let ledger = ledger_with_account(1, 0);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.credit(1, Decimal::from(5))
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let account = ledger.get(1).unwrap();
    assert_eq!(account.balance, Decimal::from(100));
    assert_eq!(account.version, 20);
}

// Two accounts share no lock; both sides of a parallel batch finish
// with exact balances.
#[tokio::test(flavor = "multi_thread")]
async fn test_accounts_are_independent() {
    let ledger = ledger_with_account(1, 1000);
    ledger
        .register(Account::new(
            2,
            "CORR-2",
            Currency::Usd,
            Decimal::from(1000),
            Decimal::from(1_000_000),
            Decimal::from(10_000_000),
        ))
        .unwrap();

    let mut handles = Vec::new();
    for id in [1u64, 2u64] {
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.reserve_limit(id, Decimal::from(10))
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(ledger.get(1).unwrap().balance, Decimal::from(900));
    assert_eq!(ledger.get(2).unwrap().balance, Decimal::from(900));
}

#[tokio::test]
async fn test_limit_enforcer_resets_all_accounts() {
    let ledger = ledger_with_account(1, 1000);
    ledger
        .register(Account::new(
            2,
            "CORR-2",
            Currency::Eur,
            Decimal::from(1000),
            Decimal::from(1_000_000),
            Decimal::from(10_000_000),
        ))
        .unwrap();
    ledger.reserve_limit(1, Decimal::from(100)).unwrap();
    ledger.reserve_limit(2, Decimal::from(200)).unwrap();

    let enforcer = LimitEnforcer::new(ledger.clone());
    assert_eq!(enforcer.reset_daily(), 2);
    assert_eq!(ledger.get(1).unwrap().daily_used, Decimal::ZERO);
    assert_eq!(ledger.get(2).unwrap().daily_used, Decimal::ZERO);
    // Monthly counters are untouched by the daily reset
    assert_eq!(ledger.get(1).unwrap().monthly_used, Decimal::from(100));

    assert_eq!(enforcer.reset_monthly(), 2);
    assert_eq!(ledger.get(1).unwrap().monthly_used, Decimal::ZERO);

    // Balances are never touched by resets
    assert_eq!(ledger.get(1).unwrap().balance, Decimal::from(900));
    assert_eq!(ledger.get(2).unwrap().balance, Decimal::from(800));
}
