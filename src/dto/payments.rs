use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::gateway::{GatewayOption, InitiateResponse, RefundResponse, VerifyResponse};
use crate::models::{GatewayKind, Payment};

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
    pub gateway: GatewayKind,
    /// Minor units (cents).
    pub amount: i64,
    /// ISO 4217; defaults to the configured currency when omitted.
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub reference: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundPaymentRequest {
    /// Minor units; omitted means full refund.
    pub amount: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentInitiated {
    pub payment: Payment,
    pub gateway: InitiateResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentVerified {
    pub payment: Payment,
    pub result: VerifyResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentRefunded {
    pub payment: Payment,
    pub result: RefundResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GatewayList {
    pub items: Vec<GatewayOption>,
}
