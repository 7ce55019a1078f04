// Integration tests for the transfer saga, driven against the mock
// gateway so retries and side effects are observable.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;

use crossledger::account::{Account, AccountId, Currency};
use crossledger::errors::TransferError;
use crossledger::events::RecordingEventSink;
use crossledger::gateway::{GatewayError, MockGateway};
use crossledger::ledger::Ledger;
use crossledger::transfer::orchestrator::{RetryPolicy, TransferOrchestrator};
use crossledger::transfer::state::TransferStatus;
use crossledger::transfer::store::{MemoryTransferStore, TransferStore};
use crossledger::transfer::types::{Destination, TransferKind, TransferRequest};

struct Harness {
    ledger: Arc<Ledger>,
    store: Arc<MemoryTransferStore>,
    gateway: Arc<MockGateway>,
    events: Arc<RecordingEventSink>,
    orchestrator: Arc<TransferOrchestrator>,
}

fn harness() -> Harness {
    let ledger = Arc::new(Ledger::new());
    ledger
        .register(Account::new(
            1,
            "CORR-1",
            Currency::Usd,
            Decimal::from(500),
            Decimal::from(1000),
            Decimal::from(10_000),
        ))
        .unwrap();
    ledger
        .register(Account::new(
            2,
            "CORR-2",
            Currency::Usd,
            Decimal::from(100),
            Decimal::from(1000),
            Decimal::from(10_000),
        ))
        .unwrap();

    let store = Arc::new(MemoryTransferStore::new());
    let gateway = Arc::new(MockGateway::new());
    let events = Arc::new(RecordingEventSink::new());
    let orchestrator = Arc::new(TransferOrchestrator::new(
        ledger.clone(),
        store.clone(),
        gateway.clone(),
        events.clone(),
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
        },
    ));

    Harness {
        ledger,
        store,
        gateway,
        events,
        orchestrator,
    }
}

fn external_request(amount: u64) -> TransferRequest {
    TransferRequest {
        source: 1,
        destination: Destination::External("DE89-EXT-0001".to_string()),
        amount: Decimal::from(amount),
        currency: Currency::Usd,
    }
}

fn balance(h: &Harness, id: AccountId) -> Decimal {
    h.ledger.get(id).unwrap().balance
}

// Scenario: transient send failure is retried with the same reservation
// code and the transfer still completes.
#[tokio::test]
async fn test_send_retried_after_transient_failure_completes() {
    let h = harness();
    h.gateway
        .push_send_failure(GatewayError::Transient("HTTP 500".to_string()));

    let record = h.orchestrator.transfer(external_request(100)).await.unwrap();

    assert_eq!(record.status, TransferStatus::Completed);
    assert!(record.external_reference.is_some());
    assert!(record.reservation_code.is_some());
    assert_eq!(balance(&h, 1), Decimal::from(400));
    assert_eq!(h.gateway.send_calls(), 2);
    assert_eq!(h.gateway.send_effects(), 1);
    assert_eq!(h.gateway.confirm_effects(), 1);
}

// Scenario: insufficient funds fails synchronously, persists nothing,
// and never touches the gateway.
#[tokio::test]
async fn test_insufficient_funds_is_synchronous_and_side_effect_free() {
    let h = harness();
    let req = TransferRequest {
        source: 2,
        destination: Destination::External("DE89-EXT-0001".to_string()),
        amount: Decimal::from(300),
        currency: Currency::Usd,
    };

    let err = h.orchestrator.transfer(req).await.unwrap_err();

    assert!(matches!(err, TransferError::InsufficientFunds { .. }));
    assert_eq!(balance(&h, 2), Decimal::from(100));
    assert!(h.orchestrator.history(2, 10).await.unwrap().is_empty());
    assert_eq!(h.gateway.reserve_calls(), 0);
}

// Scenario: two concurrent transfers racing one balance; exactly one
// wins, the other sees InsufficientFunds.
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_transfers_cannot_overdraw() {
    let h = harness();
    h.ledger
        .register(Account::new(
            3,
            "CORR-3",
            Currency::Usd,
            Decimal::from(400),
            Decimal::from(10_000),
            Decimal::from(100_000),
        ))
        .unwrap();

    let make_req = |dest: &str| TransferRequest {
        source: 3,
        destination: Destination::External(dest.to_string()),
        amount: Decimal::from(300),
        currency: Currency::Usd,
    };

    let o1 = h.orchestrator.clone();
    let o2 = h.orchestrator.clone();
    let r1 = make_req("EXT-A");
    let r2 = make_req("EXT-B");
    let (a, b) = tokio::join!(
        tokio::spawn(async move { o1.transfer(r1).await }),
        tokio::spawn(async move { o2.transfer(r2).await })
    );
    let a = a.unwrap();
    let b = b.unwrap();

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in [&a, &b] {
        match result {
            Ok(record) => assert_eq!(record.status, TransferStatus::Completed),
            Err(e) => assert!(matches!(e, TransferError::InsufficientFunds { .. })),
        }
    }
    assert_eq!(balance(&h, 3), Decimal::from(100));
}

// Scenario: send retries exhaust; the transfer fails and the balance is
// restored exactly once, even when the failed saga is driven again.
#[tokio::test]
async fn test_send_exhaustion_fails_and_refunds_exactly_once() {
    let h = harness();
    for _ in 0..3 {
        h.gateway
            .push_send_failure(GatewayError::Transient("HTTP 503".to_string()));
    }

    let record = h.orchestrator.transfer(external_request(100)).await.unwrap();

    assert_eq!(record.status, TransferStatus::Failed);
    assert!(record.failure_reason.is_some());
    assert_eq!(h.gateway.send_calls(), 3);
    assert_eq!(h.gateway.send_effects(), 0);
    assert_eq!(balance(&h, 1), Decimal::from(500));

    let again = h.orchestrator.execute(record.id).await.unwrap();
    assert_eq!(again.status, TransferStatus::Failed);
    assert_eq!(balance(&h, 1), Decimal::from(500));
}

#[tokio::test]
async fn test_permanent_send_failure_is_not_retried() {
    let h = harness();
    h.gateway
        .push_send_failure(GatewayError::Permanent("HTTP 400 - bad account".to_string()));

    let record = h.orchestrator.transfer(external_request(100)).await.unwrap();

    assert_eq!(record.status, TransferStatus::Failed);
    assert_eq!(h.gateway.send_calls(), 1);
    assert_eq!(balance(&h, 1), Decimal::from(500));
}

#[tokio::test]
async fn test_reserve_exhaustion_refunds() {
    let h = harness();
    for _ in 0..3 {
        h.gateway
            .push_reserve_failure(GatewayError::Transient("connection refused".to_string()));
    }

    let record = h.orchestrator.transfer(external_request(100)).await.unwrap();

    assert_eq!(record.status, TransferStatus::Failed);
    assert!(record.reservation_code.is_none());
    assert_eq!(balance(&h, 1), Decimal::from(500));
    assert_eq!(h.gateway.send_calls(), 0);
}

// Internal transfers skip the gateway entirely: one local credit plus a
// mirrored deposit record, money conserved across both accounts.
#[tokio::test]
async fn test_internal_transfer_credits_destination_with_mirror_record() {
    let h = harness();
    let total_before = balance(&h, 1) + balance(&h, 2);

    let record = h
        .orchestrator
        .transfer(TransferRequest {
            source: 1,
            destination: Destination::Internal(2),
            amount: Decimal::from(150),
            currency: Currency::Usd,
        })
        .await
        .unwrap();

    assert_eq!(record.status, TransferStatus::Completed);
    assert!(record.reservation_code.is_none());
    assert_eq!(balance(&h, 1), Decimal::from(350));
    assert_eq!(balance(&h, 2), Decimal::from(250));
    assert_eq!(balance(&h, 1) + balance(&h, 2), total_before);
    assert_eq!(h.gateway.reserve_calls(), 0);

    let dest_history = h.orchestrator.history(2, 10).await.unwrap();
    let mirror = dest_history
        .iter()
        .find(|r| r.kind == TransferKind::Deposit)
        .expect("mirror deposit record");
    assert_eq!(mirror.amount, Decimal::from(150));
    assert_eq!(mirror.status, TransferStatus::Completed);
    assert_eq!(mirror.source, Some(1));
}

#[tokio::test]
async fn test_reservation_codes_never_repeat() {
    let h = harness();
    for _ in 0..5 {
        let record = h.orchestrator.transfer(external_request(50)).await.unwrap();
        assert_eq!(record.status, TransferStatus::Completed);
    }

    let codes = h.gateway.issued_codes();
    assert_eq!(codes.len(), 5);
    let unique: HashSet<&String> = codes.iter().collect();
    assert_eq!(unique.len(), codes.len());

    let history = h.orchestrator.history(1, 10).await.unwrap();
    let mut seen = HashSet::new();
    for record in history
        .iter()
        .filter(|r| r.kind == TransferKind::Transfer)
    {
        assert!(seen.insert(record.reservation_code.clone().unwrap()));
    }
    assert_eq!(seen.len(), 5);
}

#[tokio::test]
async fn test_daily_limit_blocks_before_any_side_effect() {
    let h = harness();
    h.ledger
        .register(Account::new(
            5,
            "CORR-5",
            Currency::Usd,
            Decimal::from(5000),
            Decimal::from(1000),
            Decimal::from(100_000),
        ))
        .unwrap();

    let err = h
        .orchestrator
        .transfer(TransferRequest {
            source: 5,
            destination: Destination::External("EXT-X".to_string()),
            amount: Decimal::from(1200),
            currency: Currency::Usd,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::DailyLimitExceeded { .. }));
    assert_eq!(balance(&h, 5), Decimal::from(5000));
    assert_eq!(h.gateway.reserve_calls(), 0);
}

#[tokio::test]
async fn test_cancel_before_send_releases_funds() {
    let h = harness();
    let record = h.orchestrator.submit(external_request(100)).await.unwrap();
    assert_eq!(balance(&h, 1), Decimal::from(400));

    // Reserved, but no send attempt yet
    h.store
        .update_status_if(record.id, TransferStatus::Pending, TransferStatus::Reserved)
        .await
        .unwrap();

    let cancelled = h.orchestrator.cancel(record.id).await.unwrap();
    assert_eq!(cancelled.status, TransferStatus::Cancelled);
    assert_eq!(balance(&h, 1), Decimal::from(500));

    // Driving a cancelled transfer is a no-op
    let after = h.orchestrator.execute(record.id).await.unwrap();
    assert_eq!(after.status, TransferStatus::Cancelled);
    assert_eq!(balance(&h, 1), Decimal::from(500));
    assert_eq!(h.gateway.send_calls(), 0);
}

#[tokio::test]
async fn test_cancel_refused_outside_reserved() {
    let h = harness();

    // Pending: the saga has not reached Reserved yet
    let submitted = h.orchestrator.submit(external_request(100)).await.unwrap();
    let err = h.orchestrator.cancel(submitted.id).await.unwrap_err();
    assert!(matches!(err, TransferError::CancellationNotAllowed { .. }));

    // The reservation stays intact and the saga still completes
    let done = h.orchestrator.execute(submitted.id).await.unwrap();
    assert_eq!(done.status, TransferStatus::Completed);

    // Completed: far past the cancellation window
    let err = h.orchestrator.cancel(done.id).await.unwrap_err();
    assert!(matches!(err, TransferError::CancellationNotAllowed { .. }));
    assert_eq!(balance(&h, 1), Decimal::from(400));
}

// Confirm failures never auto-reverse: the record rests in Sent, shows
// up on the operator surface, and a later pass completes it with the
// same reservation code.
#[tokio::test]
async fn test_unconfirmed_transfer_rests_in_sent_for_operators() {
    let h = harness();
    for _ in 0..3 {
        h.gateway
            .push_confirm_failure(GatewayError::Transient("timeout".to_string()));
    }

    let record = h.orchestrator.transfer(external_request(100)).await.unwrap();
    assert_eq!(record.status, TransferStatus::Sent);
    assert_eq!(balance(&h, 1), Decimal::from(400));

    let stuck = h.orchestrator.unconfirmed().await.unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].id, record.id);

    let recovered = h.orchestrator.execute(record.id).await.unwrap();
    assert_eq!(recovered.status, TransferStatus::Completed);
    assert_eq!(h.gateway.confirm_effects(), 1);
    assert!(h.orchestrator.unconfirmed().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_each_transition_emits_one_audit_event() {
    let h = harness();
    let record = h.orchestrator.transfer(external_request(100)).await.unwrap();
    assert_eq!(record.status, TransferStatus::Completed);

    let transitions: Vec<(Option<String>, String)> = h
        .events
        .events()
        .into_iter()
        .filter(|e| e.transfer_id == record.id.to_string())
        .map(|e| (e.from_status, e.to_status))
        .collect();

    assert_eq!(
        transitions,
        vec![
            (None, "pending".to_string()),
            (Some("pending".to_string()), "reserved".to_string()),
            (Some("reserved".to_string()), "sent".to_string()),
            (Some("sent".to_string()), "completed".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_deposit_and_withdraw_round_trip() {
    let h = harness();

    let deposit = h.orchestrator.deposit(1, Decimal::from(200)).await.unwrap();
    assert_eq!(deposit.kind, TransferKind::Deposit);
    assert_eq!(deposit.status, TransferStatus::Completed);
    assert_eq!(balance(&h, 1), Decimal::from(700));

    let withdrawal = h.orchestrator.withdraw(1, Decimal::from(100)).await.unwrap();
    assert_eq!(withdrawal.kind, TransferKind::Withdrawal);
    assert_eq!(balance(&h, 1), Decimal::from(600));
    // Withdrawals consume the same limit counters as outbound transfers
    assert_eq!(h.ledger.get(1).unwrap().daily_used, Decimal::from(100));

    let history = h.orchestrator.history(1, 10).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_validation_failures_leave_no_trace() {
    let h = harness();

    let mismatch = h
        .orchestrator
        .transfer(TransferRequest {
            source: 1,
            destination: Destination::External("EXT-X".to_string()),
            amount: Decimal::from(10),
            currency: Currency::Eur,
        })
        .await
        .unwrap_err();
    assert!(matches!(mismatch, TransferError::CurrencyMismatch { .. }));

    let same = h
        .orchestrator
        .transfer(TransferRequest {
            source: 1,
            destination: Destination::Internal(1),
            amount: Decimal::from(10),
            currency: Currency::Usd,
        })
        .await
        .unwrap_err();
    assert!(matches!(same, TransferError::SameAccount));

    let empty = h
        .orchestrator
        .transfer(TransferRequest {
            source: 1,
            destination: Destination::External("  ".to_string()),
            amount: Decimal::from(10),
            currency: Currency::Usd,
        })
        .await
        .unwrap_err();
    assert!(matches!(empty, TransferError::InvalidDestination(_)));

    let missing = h
        .orchestrator
        .transfer(TransferRequest {
            source: 99,
            destination: Destination::External("EXT-X".to_string()),
            amount: Decimal::from(10),
            currency: Currency::Usd,
        })
        .await
        .unwrap_err();
    assert!(matches!(missing, TransferError::AccountNotFound(99)));

    assert_eq!(balance(&h, 1), Decimal::from(500));
    assert!(h.orchestrator.history(1, 10).await.unwrap().is_empty());
    assert_eq!(h.gateway.reserve_calls(), 0);
}
