use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, QueryFilter, Set,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::OrmConn;
use crate::dto::payments::{
    GatewayList, InitiatePaymentRequest, PaymentInitiated, PaymentRefunded, PaymentVerified,
    RefundPaymentRequest, VerifyPaymentRequest,
};
use crate::entity::customers::{self, Entity as Customers};
use crate::entity::payments::{self, Entity as Payments};
use crate::error::{AppError, AppResult};
use crate::gateway::PaymentDetails;
use crate::models::{GatewayKind, OrderStatus, Payment, PaymentStatus};
use crate::response::{ApiResponse, Meta};
use crate::services::order_service::{self, audit};
use crate::state::AppState;

pub async fn list_gateways(state: &AppState) -> AppResult<ApiResponse<GatewayList>> {
    Ok(ApiResponse::success(
        "Available payment gateways",
        GatewayList {
            items: state.gateways.available().to_vec(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_payment(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Payment>> {
    let payment = find_payment(state, id).await?;
    Ok(ApiResponse::success(
        "Payment retrieved",
        payment_from_entity(payment)?,
        Some(Meta::empty()),
    ))
}

/// Create a payment for an order and open it with the gateway. The payment
/// row is created pending, moved to processing, and stays processing on a
/// successful initiation; a gateway failure marks it failed with the reason
/// in metadata and surfaces GATEWAY_FAILURE.
pub async fn initiate_payment(
    state: &AppState,
    payload: InitiatePaymentRequest,
) -> AppResult<ApiResponse<PaymentInitiated>> {
    if payload.amount < 1 {
        return Err(AppError::Validation("payment amount must be positive".into()));
    }
    let currency = payload
        .currency
        .unwrap_or_else(|| state.payments.default_currency.clone());
    if currency.len() != 3 {
        return Err(AppError::Validation(format!(
            "currency {currency} is not a three-letter code"
        )));
    }

    let order = order_service::find_active(&state.orm, payload.order_id).await?;

    let completed = Payments::find()
        .filter(payments::Column::OrderId.eq(order.id))
        .filter(payments::Column::Status.eq(PaymentStatus::Completed.as_str()))
        .one(&state.orm)
        .await?;
    if completed.is_some() {
        return Err(AppError::Conflict(format!(
            "order {} already has a completed payment",
            order.id
        )));
    }

    let email = customer_email(state, order.customer_id).await?;

    let payment = payments::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        transaction_id: Set(None),
        gateway: Set(payload.gateway.as_str().to_string()),
        amount: Set(payload.amount),
        currency: Set(currency.to_uppercase()),
        status: Set(PaymentStatus::Pending.as_str().to_string()),
        metadata: Set(None),
        paid_at: Set(None),
        refunded_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let provider = state
        .gateways
        .provider(payload.gateway)
        .ok_or_else(|| AppError::GatewayFailure(format!("gateway {} is not configured", payload.gateway)))?;

    let payment = set_payment_status(&state.orm, payment, PaymentStatus::Processing).await?;
    let details = details_for(&payment, email);

    match provider.initiate(&details).await {
        Ok(result) => {
            let mut active: payments::ActiveModel = payment.into();
            active.transaction_id = Set(Some(result.reference.clone()));
            active.metadata = Set(Some(merge_metadata(
                active.metadata.take().flatten(),
                "gateway_response",
                json!({ "reference": result.reference, "params": result.params }),
            )));
            active.updated_at = Set(Utc::now().into());
            let payment = active.update(&state.orm).await?;

            tracing::info!(
                payment_id = %payment.id,
                order_id = %payment.order_id,
                gateway = %payload.gateway,
                reference = %result.reference,
                "payment initiated"
            );
            audit(
                state,
                "payment.initiated",
                &payment.id,
                json!({ "order_id": payment.order_id, "gateway": payload.gateway.as_str() }),
            )
            .await;

            Ok(ApiResponse::success(
                "Payment initiated",
                PaymentInitiated {
                    payment: payment_from_entity(payment)?,
                    gateway: result,
                },
                Some(Meta::empty()),
            ))
        }
        Err(err) => {
            tracing::error!(
                payment_id = %payment.id,
                gateway = %payload.gateway,
                error = %err,
                "payment initiation failed"
            );
            mark_as_failed(&state.orm, payment, &err.to_string()).await?;
            Err(AppError::GatewayFailure(err.message))
        }
    }
}

/// Confirm a payment against the gateway. A completed result records the
/// transaction id and paid_at and moves the order from pending to
/// processing; any other canonical status is stored as returned.
pub async fn verify_payment(
    state: &AppState,
    id: Uuid,
    payload: VerifyPaymentRequest,
) -> AppResult<ApiResponse<PaymentVerified>> {
    let payment = find_payment(state, id).await?;
    let kind = gateway_kind(&payment)?;
    let provider = state
        .gateways
        .provider(kind)
        .ok_or_else(|| AppError::GatewayFailure(format!("gateway {kind} is not configured")))?;

    let result = match provider.verify(&payload.reference).await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(payment_id = %payment.id, gateway = %kind, error = %err, "payment verification failed");
            return Err(AppError::GatewayFailure(err.message));
        }
    };

    if result.amount != payment.amount {
        tracing::warn!(
            payment_id = %payment.id,
            expected = payment.amount,
            reported = result.amount,
            "gateway reported a different amount than recorded"
        );
    }

    let payment = if result.status.is_successful() {
        let payment =
            mark_as_completed(&state.orm, payment, &result.transaction_id, &result.metadata)
                .await?;

        let order = order_service::find_active(&state.orm, payment.order_id).await?;
        let customer_id = order.customer_id;
        let current = order_service::parse_status(&order)?;
        if current.can_transition_to(OrderStatus::Processing) {
            order_service::transition_order(&state.orm, order, OrderStatus::Processing).await?;
        } else if current != OrderStatus::Processing {
            tracing::warn!(
                order_id = %payment.order_id,
                status = %current,
                "payment completed for an order that cannot move to processing"
            );
        }

        let email = customer_email(state, customer_id).await?;
        let model = payment_from_entity(payment.clone())?;
        state.notifier.payment_success(&model, email.as_deref()).await;
        payment
    } else {
        set_payment_status(&state.orm, payment, result.status).await?
    };

    audit(
        state,
        "payment.verified",
        &payment.id,
        json!({ "status": payment.status, "reference": payload.reference }),
    )
    .await;

    Ok(ApiResponse::success(
        "Payment verified",
        PaymentVerified {
            payment: payment_from_entity(payment)?,
            result,
        },
        Some(Meta::empty()),
    ))
}

/// Refund a payment, fully when no amount is given. A full refund also moves
/// the order to refunded; a partial refund leaves the order alone.
pub async fn refund_payment(
    state: &AppState,
    id: Uuid,
    payload: RefundPaymentRequest,
) -> AppResult<ApiResponse<PaymentRefunded>> {
    if let Some(amount) = payload.amount {
        if amount < 1 {
            return Err(AppError::Validation("refund amount must be positive".into()));
        }
    }

    let payment = find_payment(state, id).await?;
    let status = parse_payment_status(&payment)?;
    if !status.can_be_refunded() {
        return Err(AppError::Conflict(format!(
            "payment {} cannot be refunded from status {}",
            payment.id, status
        )));
    }
    if let Some(amount) = payload.amount {
        if amount > payment.amount {
            return Err(AppError::Validation(format!(
                "refund amount {} exceeds payment amount {}",
                amount, payment.amount
            )));
        }
    }

    let kind = gateway_kind(&payment)?;
    let provider = state
        .gateways
        .provider(kind)
        .ok_or_else(|| AppError::GatewayFailure(format!("gateway {kind} is not configured")))?;

    let email = customer_email(state, order_id_customer(state, payment.order_id).await?).await?;
    let details = details_for(&payment, email);

    let result = match provider.refund(&details, payload.amount).await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(payment_id = %payment.id, gateway = %kind, error = %err, "refund failed");
            return Err(AppError::GatewayFailure(err.message));
        }
    };

    let full = payload.amount.is_none_or(|amount| amount >= payment.amount);
    let order_id = payment.order_id;
    let payment = mark_as_refunded(&state.orm, payment, full, &result.refund_id).await?;

    if full {
        let order = order_service::find_active(&state.orm, order_id).await?;
        let current = order_service::parse_status(&order)?;
        if current.can_transition_to(OrderStatus::Refunded) {
            order_service::transition_order(&state.orm, order, OrderStatus::Refunded).await?;
        } else if current != OrderStatus::Refunded {
            tracing::warn!(
                order_id = %order_id,
                status = %current,
                "payment fully refunded but the order cannot move to refunded"
            );
        }
    }

    tracing::info!(
        payment_id = %payment.id,
        order_id = %order_id,
        refund_id = %result.refund_id,
        amount = result.amount,
        full,
        "payment refunded"
    );
    audit(
        state,
        "payment.refunded",
        &payment.id,
        json!({ "order_id": order_id, "amount": result.amount, "full": full }),
    )
    .await;

    Ok(ApiResponse::success(
        "Payment refunded",
        PaymentRefunded {
            payment: payment_from_entity(payment)?,
            result,
        },
        Some(Meta::empty()),
    ))
}

// --- Persistence helpers --------------------------------------------------

async fn find_payment(state: &AppState, id: Uuid) -> AppResult<payments::Model> {
    Payments::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("payment {id} not found")))
}

async fn set_payment_status(
    orm: &OrmConn,
    payment: payments::Model,
    status: PaymentStatus,
) -> AppResult<payments::Model> {
    let mut active: payments::ActiveModel = payment.into();
    active.status = Set(status.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(orm).await?)
}

async fn mark_as_completed(
    orm: &OrmConn,
    payment: payments::Model,
    transaction_id: &str,
    gateway_metadata: &Value,
) -> AppResult<payments::Model> {
    let mut metadata = merge_metadata(
        payment.metadata.clone(),
        "gateway_response",
        gateway_metadata.clone(),
    );
    // PayPal refunds go against the capture, not the order; keep the id
    // where the refund path can find it.
    if let Some(capture_id) = gateway_metadata.get("capture_id").and_then(Value::as_str) {
        metadata = merge_metadata(Some(metadata), "capture_id", Value::String(capture_id.into()));
    }

    let mut active: payments::ActiveModel = payment.into();
    active.status = Set(PaymentStatus::Completed.as_str().to_string());
    active.transaction_id = Set(Some(transaction_id.to_string()));
    active.metadata = Set(Some(metadata));
    active.paid_at = Set(Some(Utc::now().into()));
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(orm).await?)
}

async fn mark_as_failed(
    orm: &OrmConn,
    payment: payments::Model,
    reason: &str,
) -> AppResult<payments::Model> {
    let metadata = merge_metadata(
        payment.metadata.clone(),
        "failure_reason",
        Value::String(reason.to_string()),
    );
    let mut active: payments::ActiveModel = payment.into();
    active.status = Set(PaymentStatus::Failed.as_str().to_string());
    active.metadata = Set(Some(metadata));
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(orm).await?)
}

async fn mark_as_refunded(
    orm: &OrmConn,
    payment: payments::Model,
    full: bool,
    refund_id: &str,
) -> AppResult<payments::Model> {
    let metadata = merge_metadata(
        payment.metadata.clone(),
        "refund_id",
        Value::String(refund_id.to_string()),
    );
    let mut active: payments::ActiveModel = payment.into();
    active.status = Set(if full {
        PaymentStatus::Refunded.as_str().to_string()
    } else {
        PaymentStatus::PartiallyRefunded.as_str().to_string()
    });
    active.metadata = Set(Some(metadata));
    if full {
        active.refunded_at = Set(Some(Utc::now().into()));
    }
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(orm).await?)
}

// --- Conversions and lookups ----------------------------------------------

async fn order_id_customer(state: &AppState, order_id: Uuid) -> AppResult<Uuid> {
    Ok(order_service::find_active(&state.orm, order_id)
        .await?
        .customer_id)
}

async fn customer_email(state: &AppState, customer_id: Uuid) -> AppResult<Option<String>> {
    Ok(Customers::find_by_id(customer_id)
        .filter(customers::Column::DeletedAt.is_null())
        .one(&state.orm)
        .await?
        .map(|customer| customer.email))
}

fn details_for(payment: &payments::Model, customer_email: Option<String>) -> PaymentDetails {
    let capture_id = payment
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get("capture_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    PaymentDetails {
        payment_id: payment.id,
        order_id: payment.order_id,
        amount: payment.amount,
        currency: payment.currency.clone(),
        transaction_id: payment.transaction_id.clone(),
        capture_id,
        customer_email,
    }
}

fn gateway_kind(payment: &payments::Model) -> AppResult<GatewayKind> {
    GatewayKind::parse(&payment.gateway).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "payment {} carries unknown gateway {:?}",
            payment.id,
            payment.gateway
        ))
    })
}

fn parse_payment_status(payment: &payments::Model) -> AppResult<PaymentStatus> {
    PaymentStatus::parse(&payment.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "payment {} carries unknown status {:?}",
            payment.id,
            payment.status
        ))
    })
}

fn merge_metadata(current: Option<Value>, key: &str, value: Value) -> Value {
    let mut map = match current {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    map.insert(key.to_string(), value);
    Value::Object(map)
}

pub(crate) fn payment_from_entity(model: payments::Model) -> AppResult<Payment> {
    let status = parse_payment_status(&model)?;
    let gateway = gateway_kind(&model)?;
    Ok(Payment {
        id: model.id,
        order_id: model.order_id,
        transaction_id: model.transaction_id,
        gateway,
        amount: model.amount,
        currency: model.currency,
        status,
        metadata: model.metadata,
        paid_at: model.paid_at.map(|at| at.with_timezone(&Utc)),
        refunded_at: model.refunded_at.map(|at| at.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_metadata_starts_from_empty_object() {
        let merged = merge_metadata(None, "failure_reason", json!("card declined"));
        assert_eq!(merged, json!({ "failure_reason": "card declined" }));
    }

    #[test]
    fn merge_metadata_keeps_existing_keys() {
        let merged = merge_metadata(
            Some(json!({ "gateway_response": { "reference": "pi_1" } })),
            "capture_id",
            json!("CAP-9"),
        );
        assert_eq!(
            merged,
            json!({
                "gateway_response": { "reference": "pi_1" },
                "capture_id": "CAP-9",
            })
        );
    }

    #[test]
    fn merge_metadata_overwrites_same_key() {
        let merged = merge_metadata(
            Some(json!({ "failure_reason": "old" })),
            "failure_reason",
            json!("new"),
        );
        assert_eq!(merged, json!({ "failure_reason": "new" }));
    }
}
