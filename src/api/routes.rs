use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::ReportService;
use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::error::AppError;
use crate::jobs::{EnqueueOutcome, JobPoll, JobStatus, JobStore};
use crate::types::{JobKey, ReportRow, TaxPeriod};
use crate::upstream::SolanaClient;

#[derive(Clone)]
pub struct ApiState {
    pub reports: Arc<ReportService>,
    pub jobs: Arc<JobStore>,
    pub solana: Arc<SolanaClient>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub min_tax_year: i32,
    pub max_tax_year: i32,
}

impl ApiState {
    fn period(&self, raw_year: &str) -> Result<TaxPeriod, AppError> {
        TaxPeriod::parse(raw_year, self.min_tax_year, self.max_tax_year)
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/data/:address", get(get_report))
        .route("/jobs/:address/:year", get(consume_job).post(enqueue_job))
        .route("/jobs/:address/:year/status", get(job_status))
        .route("/price/:ticker", get(get_spot_price))
        .route("/balance/:owner/:ticker", get(get_balance))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ReportQuery {
    /// Tax year starting 6 April; defaults to the latest supported year.
    pub year: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub data: Vec<ReportRow>,
}

#[derive(Debug, Serialize)]
pub struct JobAck {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SpotPriceResponse {
    pub ticker: String,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub owner: String,
    pub ticker: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_report(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(params): Query<ReportQuery>,
) -> Result<Json<ReportResponse>, AppError> {
    let period = match params.year.as_deref() {
        Some(raw) => state.period(raw)?,
        None => TaxPeriod::new(state.max_tax_year, state.min_tax_year, state.max_tax_year)?,
    };
    let data = state.reports.compute_report(&address, &period).await?;
    Ok(Json(ReportResponse { data }))
}

async fn enqueue_job(
    State(state): State<ApiState>,
    Path((address, year)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let period = state.period(&year)?;
    let key = JobKey::new(address.clone(), &period);

    let reports = Arc::clone(&state.reports);
    let outcome = state.jobs.enqueue(key, async move {
        reports.compute_report(&address, &period).await
    });

    let resp = match outcome {
        EnqueueOutcome::Accepted => (StatusCode::ACCEPTED, Json(JobAck { status: "accepted" })),
        EnqueueOutcome::AlreadyQueued => (StatusCode::OK, Json(JobAck { status: "already_queued" })),
    };
    Ok(resp.into_response())
}

async fn consume_job(
    State(state): State<ApiState>,
    Path((address, year)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let period = state.period(&year)?;
    let key = JobKey::new(address, &period);

    let resp = match state.jobs.consume(&key) {
        JobPoll::Ready(data) => {
            info!(%key, rows = data.len(), "[API] job result delivered");
            (StatusCode::OK, Json(ReportResponse { data })).into_response()
        }
        JobPoll::NotReady => {
            (StatusCode::ACCEPTED, Json(JobAck { status: "not_ready" })).into_response()
        }
    };
    Ok(resp)
}

async fn job_status(
    State(state): State<ApiState>,
    Path((address, year)): Path<(String, String)>,
) -> Result<Json<JobStatus>, AppError> {
    let period = state.period(&year)?;
    Ok(Json(state.jobs.status(&JobKey::new(address, &period))))
}

async fn get_spot_price(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
) -> Result<Json<SpotPriceResponse>, AppError> {
    let price = state.reports.spot_price(&ticker).await?;
    Ok(Json(SpotPriceResponse {
        currency: state.reports.currency().to_string(),
        ticker: ticker.to_lowercase(),
        price,
    }))
}

async fn get_balance(
    State(state): State<ApiState>,
    Path((owner, ticker)): Path<(String, String)>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.solana.balance(&owner, &ticker).await?;
    Ok(Json(BalanceResponse {
        owner,
        ticker: ticker.to_lowercase(),
        balance,
    }))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}
