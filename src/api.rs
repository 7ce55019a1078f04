use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Query},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::account::AccountId;
use crate::errors::TransferError;
use crate::gateway::IncomingTransfer;
use crate::ledger::Ledger;
use crate::limits::LimitEnforcer;
use crate::reconciler::{ReconcileStats, Reconciler};
use crate::transfer::orchestrator::TransferOrchestrator;
use crate::transfer::types::{TransferRequest, TransferResponse};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: i32,
    pub msg: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: 0,
            msg: "ok".to_string(),
            data,
        }
    }
}

pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub orchestrator: Arc<TransferOrchestrator>,
    pub reconciler: Arc<Reconciler>,
    pub limits: Arc<LimitEnforcer>,
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/transfers", post(create_transfer))
        .route("/api/v1/transfers/status", get(transfer_status))
        .route("/api/v1/transfers/cancel", post(cancel_transfer))
        .route("/api/v1/transfers/history", get(transfer_history))
        .route("/api/v1/transfers/unconfirmed", get(unconfirmed_transfers))
        .route("/api/v1/deposits", post(create_deposit))
        .route("/api/v1/withdrawals", post(create_withdrawal))
        .route("/api/v1/accounts/balance", get(account_balance))
        .route("/api/v1/admin/reconcile", post(trigger_reconcile))
        .route("/api/v1/admin/reconcile/push", post(push_incoming))
        .route("/api/v1/admin/reconcile/unmatched", get(unmatched_incoming))
        .route("/api/v1/admin/limits/reset_daily", post(reset_daily))
        .route("/api/v1/admin/limits/reset_monthly", post(reset_monthly))
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
}

fn error_response(err: TransferError) -> (StatusCode, String) {
    let status = if matches!(err, TransferError::TransferNotFound(_)) {
        StatusCode::NOT_FOUND
    } else if matches!(err, TransferError::ReconciliationConflict(_)) {
        StatusCode::CONFLICT
    } else if err.is_user_error() {
        StatusCode::BAD_REQUEST
    } else if err.is_retryable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, format!("{}: {}", err.error_code(), err))
}

async fn create_transfer(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<ApiResponse<TransferResponse>>, (StatusCode, String)> {
    let record = state
        .orchestrator
        .transfer(req)
        .await
        .map_err(error_response)?;
    Ok(Json(ApiResponse::success(TransferResponse::from(&record))))
}

#[derive(Deserialize)]
struct TransferIdParams {
    id: Uuid,
}

async fn transfer_status(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<TransferIdParams>,
) -> Result<Json<ApiResponse<TransferResponse>>, (StatusCode, String)> {
    let record = state
        .orchestrator
        .status(params.id)
        .await
        .map_err(error_response)?;
    Ok(Json(ApiResponse::success(TransferResponse::from(&record))))
}

async fn cancel_transfer(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<TransferIdParams>,
) -> Result<Json<ApiResponse<TransferResponse>>, (StatusCode, String)> {
    let record = state
        .orchestrator
        .cancel(params.id)
        .await
        .map_err(error_response)?;
    Ok(Json(ApiResponse::success(TransferResponse::from(&record))))
}

#[derive(Deserialize)]
struct HistoryParams {
    account_id: AccountId,
    limit: Option<usize>,
}

async fn transfer_history(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ApiResponse<Vec<TransferResponse>>>, (StatusCode, String)> {
    let records = state
        .orchestrator
        .history(params.account_id, params.limit.unwrap_or(100))
        .await
        .map_err(error_response)?;
    let response = records.iter().map(TransferResponse::from).collect();
    Ok(Json(ApiResponse::success(response)))
}

async fn unconfirmed_transfers(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<TransferResponse>>>, (StatusCode, String)> {
    let records = state
        .orchestrator
        .unconfirmed()
        .await
        .map_err(error_response)?;
    let response = records.iter().map(TransferResponse::from).collect();
    Ok(Json(ApiResponse::success(response)))
}

#[derive(Deserialize)]
struct CashRequest {
    account_id: AccountId,
    amount: Decimal,
}

async fn create_deposit(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CashRequest>,
) -> Result<Json<ApiResponse<TransferResponse>>, (StatusCode, String)> {
    let record = state
        .orchestrator
        .deposit(req.account_id, req.amount)
        .await
        .map_err(error_response)?;
    Ok(Json(ApiResponse::success(TransferResponse::from(&record))))
}

async fn create_withdrawal(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CashRequest>,
) -> Result<Json<ApiResponse<TransferResponse>>, (StatusCode, String)> {
    let record = state
        .orchestrator
        .withdraw(req.account_id, req.amount)
        .await
        .map_err(error_response)?;
    Ok(Json(ApiResponse::success(TransferResponse::from(&record))))
}

#[derive(Deserialize)]
struct BalanceParams {
    account_id: AccountId,
}

#[derive(Debug, Serialize)]
struct BalanceData {
    account_id: AccountId,
    currency: String,
    status: String,
    balance: Decimal,
    daily_used: Decimal,
    daily_limit: Decimal,
    monthly_used: Decimal,
    monthly_limit: Decimal,
}

async fn account_balance(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<BalanceParams>,
) -> Result<Json<ApiResponse<BalanceData>>, (StatusCode, String)> {
    let account = state.ledger.get(params.account_id).map_err(error_response)?;
    Ok(Json(ApiResponse::success(BalanceData {
        account_id: account.id,
        currency: account.currency.as_str().to_string(),
        status: account.status.as_str().to_string(),
        balance: account.balance,
        daily_used: account.daily_used,
        daily_limit: account.daily_limit,
        monthly_used: account.monthly_used,
        monthly_limit: account.monthly_limit,
    })))
}

/// Push-notification hook: the correspondent (or an operator) can force
/// a reconcile pass instead of waiting for the next poll.
async fn trigger_reconcile(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<ReconcileStats>>, (StatusCode, String)> {
    let stats = state.reconciler.run_once().await.map_err(error_response)?;
    Ok(Json(ApiResponse::success(stats)))
}

/// Webhook delivery of a single incoming transfer.
async fn push_incoming(
    Extension(state): Extension<Arc<AppState>>,
    Json(entry): Json<IncomingTransfer>,
) -> Result<Json<ApiResponse<String>>, (StatusCode, String)> {
    let record_id = state
        .reconciler
        .apply_pushed(&entry)
        .await
        .map_err(error_response)?;
    Ok(Json(ApiResponse::success(record_id.to_string())))
}

async fn unmatched_incoming(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<IncomingTransfer>>>, (StatusCode, String)> {
    Ok(Json(ApiResponse::success(state.reconciler.unmatched())))
}

async fn reset_daily(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<usize>>, (StatusCode, String)> {
    Ok(Json(ApiResponse::success(state.limits.reset_daily())))
}

async fn reset_monthly(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<usize>>, (StatusCode, String)> {
    Ok(Json(ApiResponse::success(state.limits.reset_monthly())))
}
