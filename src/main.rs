use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crossledger::account::{Account, Currency};
use crossledger::api::{create_app, AppState};
use crossledger::configure::load_config;
use crossledger::events::LogEventSink;
use crossledger::gateway::HttpGateway;
use crossledger::ledger::Ledger;
use crossledger::limits::LimitEnforcer;
use crossledger::logger::setup_logger;
use crossledger::reconciler::{Reconciler, ReconcilerConfig};
use crossledger::transfer::orchestrator::{RetryPolicy, TransferOrchestrator};
use crossledger::transfer::store::MemoryTransferStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    setup_logger(&config)?;

    let ledger = Arc::new(Ledger::new());
    seed_dev_accounts(&ledger)?;

    let store = Arc::new(MemoryTransferStore::new());
    let gateway = Arc::new(HttpGateway::new(
        &config.gateway_base_url,
        &config.gateway_key,
        Duration::from_millis(config.gateway_timeout_ms),
    ));

    let retry = RetryPolicy {
        max_attempts: config.retry_max_attempts,
        base_delay_ms: config.retry_base_delay_ms,
        max_delay_ms: config.retry_max_delay_ms,
    };
    let orchestrator = Arc::new(TransferOrchestrator::new(
        ledger.clone(),
        store.clone(),
        gateway.clone(),
        Arc::new(LogEventSink),
        retry,
    ));

    let reconciler = Arc::new(Reconciler::new(
        gateway,
        ledger.clone(),
        store,
        ReconcilerConfig {
            poll_interval_ms: config.reconcile_interval_ms,
        },
    ));
    reconciler.clone().spawn();

    let limits = Arc::new(LimitEnforcer::new(ledger.clone()));

    let state = Arc::new(AppState {
        ledger,
        orchestrator,
        reconciler,
        limits,
    });
    let app = create_app(state);

    log::info!("Transfer server listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Dev-only seeding; production accounts come from account management.
fn seed_dev_accounts(ledger: &Ledger) -> Result<(), Box<dyn std::error::Error>> {
    ledger.register(Account::new(
        1001,
        "CORR-1001",
        Currency::Usd,
        Decimal::from(10_000),
        Decimal::from(5_000),
        Decimal::from(50_000),
    ))?;
    ledger.register(Account::new(
        1002,
        "CORR-1002",
        Currency::Usd,
        Decimal::from(2_500),
        Decimal::from(1_000),
        Decimal::from(10_000),
    ))?;
    ledger.register(Account::new(
        1003,
        "CORR-1003",
        Currency::Eur,
        Decimal::from(7_500),
        Decimal::from(2_000),
        Decimal::from(20_000),
    ))?;
    log::info!("Seeded 3 dev accounts");
    Ok(())
}
