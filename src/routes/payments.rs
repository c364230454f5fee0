use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::payments::{
        GatewayList, InitiatePaymentRequest, PaymentInitiated, PaymentRefunded, PaymentVerified,
        RefundPaymentRequest, VerifyPaymentRequest,
    },
    error::AppResult,
    models::Payment,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(initiate_payment))
        .route("/gateways", get(list_gateways))
        .route("/{id}", get(get_payment))
        .route("/{id}/verify", post(verify_payment))
        .route("/{id}/refund", post(refund_payment))
}

#[utoipa::path(
    get,
    path = "/api/payments/gateways",
    responses(
        (status = 200, description = "Enabled payment gateways", body = ApiResponse<GatewayList>),
    ),
    tag = "Payments"
)]
pub async fn list_gateways(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<GatewayList>>> {
    let resp = payment_service::list_gateways(&state).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/payments",
    request_body = InitiatePaymentRequest,
    responses(
        (status = 200, description = "Payment created and opened with the gateway", body = ApiResponse<PaymentInitiated>),
        (status = 404, description = "Unknown order"),
        (status = 409, description = "Order already paid"),
        (status = 502, description = "Gateway failure"),
    ),
    tag = "Payments"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> AppResult<Json<ApiResponse<PaymentInitiated>>> {
    let resp = payment_service::initiate_payment(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments/{id}",
    responses(
        (status = 200, description = "Get payment", body = ApiResponse<Payment>),
        (status = 404, description = "Not found"),
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let resp = payment_service::get_payment(&state, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment confirmed against the gateway", body = ApiResponse<PaymentVerified>),
        (status = 404, description = "Not found"),
        (status = 502, description = "Gateway failure"),
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> AppResult<Json<ApiResponse<PaymentVerified>>> {
    let resp = payment_service::verify_payment(&state, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/refund",
    request_body = RefundPaymentRequest,
    responses(
        (status = 200, description = "Payment refunded", body = ApiResponse<PaymentRefunded>),
        (status = 404, description = "Not found"),
        (status = 409, description = "Payment is not refundable"),
        (status = 502, description = "Gateway failure"),
    ),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundPaymentRequest>,
) -> AppResult<Json<ApiResponse<PaymentRefunded>>> {
    let resp = payment_service::refund_payment(&state, id, payload).await?;
    Ok(Json(resp))
}
