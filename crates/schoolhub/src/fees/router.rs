use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};

use super::domain::{
    CallbackOutcome, FeeReceipt, FeeStatement, NewFee, PaymentCallback, PaymentInitiation,
    StudentFee, StudentFeeId,
};
use super::gateway::{GatewaySetup, PaymentGateway, PaymentGatewayConfig};
use super::service::FeeLedgerService;
use crate::access::Identity;
use crate::error::ServiceError;
use crate::store::run_blocking;

/// Fee ledger routes. The callback route is called by the gateway and carries no actor;
/// it is checked by the service's callback verifier instead.
pub fn fees_router<G>(service: Arc<FeeLedgerService<G>>) -> Router
where
    G: PaymentGateway + 'static,
{
    Router::new()
        .route("/api/v1/fees", post(assign_fee_handler::<G>))
        .route("/api/v1/fees/:fee_id", get(statement_handler::<G>))
        .route("/api/v1/fees/:fee_id/pay", post(initiate_payment_handler::<G>))
        .route("/api/v1/payments/gateways", post(configure_gateway_handler::<G>))
        .route("/api/v1/payments/callback", post(callback_handler::<G>))
        .route(
            "/api/v1/payments/receipts/:receipt_number",
            get(receipt_handler::<G>),
        )
        .with_state(service)
}

pub(crate) async fn assign_fee_handler<G>(
    State(service): State<Arc<FeeLedgerService<G>>>,
    identity: Identity,
    Json(fee): Json<NewFee>,
) -> Result<(StatusCode, Json<StudentFee>), ServiceError>
where
    G: PaymentGateway + 'static,
{
    let created = run_blocking(move || service.assign_fee(&identity, fee)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn statement_handler<G>(
    State(service): State<Arc<FeeLedgerService<G>>>,
    identity: Identity,
    Path(fee_id): Path<i64>,
) -> Result<Json<FeeStatement>, ServiceError>
where
    G: PaymentGateway + 'static,
{
    run_blocking(move || service.statement(&identity, StudentFeeId(fee_id)))
        .await
        .map(Json)
}

pub(crate) async fn initiate_payment_handler<G>(
    State(service): State<Arc<FeeLedgerService<G>>>,
    identity: Identity,
    Path(fee_id): Path<i64>,
) -> Result<Json<PaymentInitiation>, ServiceError>
where
    G: PaymentGateway + 'static,
{
    run_blocking(move || service.initiate_payment(&identity, StudentFeeId(fee_id)))
        .await
        .map(Json)
}

pub(crate) async fn configure_gateway_handler<G>(
    State(service): State<Arc<FeeLedgerService<G>>>,
    identity: Identity,
    Json(setup): Json<GatewaySetup>,
) -> Result<Json<PaymentGatewayConfig>, ServiceError>
where
    G: PaymentGateway + 'static,
{
    run_blocking(move || service.configure_gateway(&identity, setup))
        .await
        .map(Json)
}

pub(crate) async fn callback_handler<G>(
    State(service): State<Arc<FeeLedgerService<G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackOutcome>, ServiceError>
where
    G: PaymentGateway + 'static,
{
    service.verify_callback(&headers, &body)?;
    let callback: PaymentCallback = serde_json::from_slice(&body)
        .map_err(|err| ServiceError::validation("body", err.to_string()))?;
    run_blocking(move || service.record_callback(callback))
        .await
        .map(Json)
}

pub(crate) async fn receipt_handler<G>(
    State(service): State<Arc<FeeLedgerService<G>>>,
    identity: Identity,
    Path(receipt_number): Path<String>,
) -> Result<Json<FeeReceipt>, ServiceError>
where
    G: PaymentGateway + 'static,
{
    run_blocking(move || service.receipt(&identity, &receipt_number))
        .await
        .map(Json)
}
