use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_orders_api::{
    config::PaymentConfig,
    db::{create_orm_conn, create_pool},
    dto::orders::{OrderItemRequest, PlaceOrderRequest},
    dto::payments::{InitiatePaymentRequest, RefundPaymentRequest, VerifyPaymentRequest},
    entity::{
        customers::ActiveModel as CustomerActive, payments::Entity as Payments,
        products::ActiveModel as ProductActive,
    },
    error::AppError,
    gateway::{
        GatewayError, Gateways, InitiateResponse, PaymentDetails, PaymentProvider, RefundResponse,
        VerifyResponse,
    },
    models::{GatewayKind, OrderStatus, PaymentStatus},
    notify::LogNotifier,
    services::{order_service, payment_service},
    state::AppState,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::json;
use uuid::Uuid;

/// In-process provider injected through the registry so the orchestrator
/// runs end to end without touching a real gateway.
struct FakeProvider {
    failing: AtomicBool,
    verify_status: Mutex<PaymentStatus>,
    amount: Mutex<i64>,
}

impl FakeProvider {
    fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            verify_status: Mutex::new(PaymentStatus::Completed),
            amount: Mutex::new(0),
        }
    }

    fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    fn set_verify_status(&self, status: PaymentStatus) {
        *self.verify_status.lock().unwrap() = status;
    }

    fn expect_amount(&self, amount: i64) {
        *self.amount.lock().unwrap() = amount;
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn initiate(&self, details: &PaymentDetails) -> Result<InitiateResponse, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::new("card declined", "fake decline"));
        }
        Ok(InitiateResponse {
            reference: format!("FAKE_{}", details.payment_id.simple()),
            gateway: "fake",
            params: json!({ "client_secret": "sec_test_123" }),
        })
    }

    async fn verify(&self, _reference: &str) -> Result<VerifyResponse, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::new("verification unavailable", "fake outage"));
        }
        Ok(VerifyResponse {
            status: *self.verify_status.lock().unwrap(),
            transaction_id: "txn_1".to_string(),
            amount: *self.amount.lock().unwrap(),
            metadata: json!({ "capture_id": "CAP-1" }),
        })
    }

    async fn refund(
        &self,
        details: &PaymentDetails,
        amount: Option<i64>,
    ) -> Result<RefundResponse, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::new("refund rejected", "fake rejection"));
        }
        Ok(RefundResponse {
            refund_id: "re_1".to_string(),
            amount: amount.unwrap_or(details.amount),
        })
    }
}

// Orchestrator flow against a real database with a fake provider: initiate,
// verify to completion (order follows), partial refund, full refund, and the
// failure paths.
#[tokio::test]
async fn payment_orchestration_flow() -> anyhow::Result<()> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let fake = Arc::new(FakeProvider::new());
    let state = setup_state(&database_url, fake.clone()).await?;

    let run = Uuid::new_v4().simple().to_string();
    let customer_id = create_customer(&state, &format!("pay-{run}@example.com")).await?;
    let product_id = create_product(&state, &format!("PAY-{run}"), 10_000, 50).await?;

    let order = order_service::place_order(
        &state,
        PlaceOrderRequest {
            customer_id,
            items: vec![OrderItemRequest {
                product_id,
                quantity: 2,
            }],
        },
    )
    .await?
    .data
    .unwrap()
    .order;
    fake.expect_amount(order.total_amount);

    // Initiate: payment is processing and carries the gateway response.
    let initiated = payment_service::initiate_payment(
        &state,
        InitiatePaymentRequest {
            order_id: order.id,
            gateway: GatewayKind::Stripe,
            amount: order.total_amount,
            currency: None,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(initiated.payment.status, PaymentStatus::Processing);
    assert_eq!(initiated.payment.amount, 20_000);
    assert_eq!(initiated.payment.currency, "USD");
    let reference = initiated.gateway.reference.clone();
    assert_eq!(initiated.payment.transaction_id.as_deref(), Some(reference.as_str()));
    let metadata = initiated.payment.metadata.as_ref().expect("metadata");
    assert!(metadata.get("gateway_response").is_some());

    // A still-pending gateway result is stored as returned and the order
    // does not advance.
    fake.set_verify_status(PaymentStatus::Pending);
    let verified = payment_service::verify_payment(
        &state,
        initiated.payment.id,
        VerifyPaymentRequest {
            reference: reference.clone(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(verified.payment.status, PaymentStatus::Pending);
    assert!(verified.payment.paid_at.is_none());
    let order_now = order_service::get_order(&state, order.id).await?.data.unwrap().order;
    assert_eq!(order_now.status, OrderStatus::Pending);

    // A gateway outage during verification surfaces as GATEWAY_FAILURE and
    // leaves the payment row untouched.
    fake.fail(true);
    let err = payment_service::verify_payment(
        &state,
        initiated.payment.id,
        VerifyPaymentRequest {
            reference: reference.clone(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::GatewayFailure(_)), "got {err:?}");
    fake.fail(false);
    let untouched = payment_service::get_payment(&state, initiated.payment.id)
        .await?
        .data
        .unwrap();
    assert_eq!(untouched.status, PaymentStatus::Pending);
    let order_now = order_service::get_order(&state, order.id).await?.data.unwrap().order;
    assert_eq!(order_now.status, OrderStatus::Pending);

    // A failed gateway result is stored as returned, again without moving
    // the order.
    fake.set_verify_status(PaymentStatus::Failed);
    let verified = payment_service::verify_payment(
        &state,
        initiated.payment.id,
        VerifyPaymentRequest {
            reference: reference.clone(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(verified.payment.status, PaymentStatus::Failed);
    let order_now = order_service::get_order(&state, order.id).await?.data.unwrap().order;
    assert_eq!(order_now.status, OrderStatus::Pending);

    // Verify to completion: transaction id and paid_at recorded, order moves
    // to processing.
    fake.set_verify_status(PaymentStatus::Completed);
    let verified = payment_service::verify_payment(
        &state,
        initiated.payment.id,
        VerifyPaymentRequest {
            reference: reference.clone(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(verified.payment.status, PaymentStatus::Completed);
    assert_eq!(verified.payment.transaction_id.as_deref(), Some("txn_1"));
    assert!(verified.payment.paid_at.is_some());
    let order_now = order_service::get_order(&state, order.id).await?.data.unwrap().order;
    assert_eq!(order_now.status, OrderStatus::Processing);

    // A second payment for an already-paid order is a conflict.
    let err = payment_service::initiate_payment(
        &state,
        InitiatePaymentRequest {
            order_id: order.id,
            gateway: GatewayKind::Stripe,
            amount: order.total_amount,
            currency: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

    // Partial refund: payment partially_refunded, order untouched.
    let refunded = payment_service::refund_payment(
        &state,
        verified.payment.id,
        RefundPaymentRequest { amount: Some(5_000) },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(refunded.payment.status, PaymentStatus::PartiallyRefunded);
    assert!(refunded.payment.refunded_at.is_none());
    assert_eq!(refunded.result.amount, 5_000);
    let order_now = order_service::get_order(&state, order.id).await?.data.unwrap().order;
    assert_eq!(order_now.status, OrderStatus::Processing);

    // Full refund: payment refunded with refunded_at, order follows.
    let refunded = payment_service::refund_payment(
        &state,
        verified.payment.id,
        RefundPaymentRequest { amount: None },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(refunded.payment.status, PaymentStatus::Refunded);
    assert!(refunded.payment.refunded_at.is_some());
    let order_now = order_service::get_order(&state, order.id).await?.data.unwrap().order;
    assert_eq!(order_now.status, OrderStatus::Refunded);

    // A refunded payment cannot be refunded again.
    let err = payment_service::refund_payment(
        &state,
        verified.payment.id,
        RefundPaymentRequest { amount: None },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

    // Provider failure on initiation: surfaced as GATEWAY_FAILURE and the
    // payment row is marked failed with the reason in metadata.
    let order2 = order_service::place_order(
        &state,
        PlaceOrderRequest {
            customer_id,
            items: vec![OrderItemRequest {
                product_id,
                quantity: 1,
            }],
        },
    )
    .await?
    .data
    .unwrap()
    .order;
    fake.fail(true);
    let err = payment_service::initiate_payment(
        &state,
        InitiatePaymentRequest {
            order_id: order2.id,
            gateway: GatewayKind::Stripe,
            amount: order2.total_amount,
            currency: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::GatewayFailure(_)), "got {err:?}");

    let failed = Payments::find()
        .filter(axum_orders_api::entity::payments::Column::OrderId.eq(order2.id))
        .one(&state.orm)
        .await?
        .expect("payment row");
    assert_eq!(failed.status, PaymentStatus::Failed.as_str());
    let reason = failed
        .metadata
        .as_ref()
        .and_then(|m| m.get("failure_reason"))
        .and_then(|v| v.as_str())
        .expect("failure_reason");
    assert!(reason.contains("card declined"));
    fake.fail(false);

    Ok(())
}

async fn setup_state(
    database_url: &str,
    fake: Arc<FakeProvider>,
) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    axum_orders_api::db::run_migrations(&orm).await?;

    let payments = PaymentConfig::default();
    let mut gateways = Gateways::from_config(&payments)?;
    gateways.set_provider(GatewayKind::Stripe, fake);

    Ok(AppState {
        pool,
        orm,
        payments,
        gateways: Arc::new(gateways),
        notifier: Arc::new(LogNotifier),
    })
}

async fn create_customer(state: &AppState, email: &str) -> anyhow::Result<Uuid> {
    let customer = CustomerActive {
        id: Set(Uuid::new_v4()),
        name: Set("Payment Tester".to_string()),
        email: Set(email.to_string()),
        phone: Set(None),
        deleted_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(customer.id)
}

async fn create_product(
    state: &AppState,
    sku: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set("Payment Widget".to_string()),
        description: Set(None),
        sku: Set(sku.to_string()),
        price: Set(price),
        stock_quantity: Set(stock),
        deleted_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product.id)
}
