use std::collections::HashSet;

use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::json;
use uuid::Uuid;

use crate::audit::log_audit;
use crate::dto::orders::{OrderList, OrderWithItems, PlaceOrderRequest, UpdateOrderStatusRequest};
use crate::entity::customers::{self, Entity as Customers};
use crate::entity::order_items::{self, Entity as OrderItems};
use crate::entity::orders::{self, Entity as Orders};
use crate::entity::products::{self, Entity as Products};
use crate::error::{AppError, AppResult};
use crate::models::{Order, OrderItem, OrderStatus};
use crate::response::{ApiResponse, Meta};
use crate::routes::params::{OrderListQuery, SortOrder};
use crate::services::product_service;
use crate::state::AppState;

/// Place an order: validate, reserve stock, and persist atomically. Stock
/// reservation and order creation commit together or not at all; audit and
/// notification happen only after commit.
pub async fn place_order(
    state: &AppState,
    payload: PlaceOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.items.is_empty() {
        return Err(AppError::Validation("order must contain at least one item".into()));
    }
    let mut seen = HashSet::new();
    for line in &payload.items {
        if line.quantity < 1 {
            return Err(AppError::Validation(format!(
                "quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        if !seen.insert(line.product_id) {
            return Err(AppError::Validation(format!(
                "product {} appears more than once",
                line.product_id
            )));
        }
    }

    // Lock products in id order so two overlapping orders cannot deadlock.
    let mut lines = payload.items;
    lines.sort_by_key(|line| line.product_id);

    let txn = state.orm.begin().await?;

    let customer = Customers::find_by_id(payload.customer_id)
        .filter(customers::Column::DeletedAt.is_null())
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("customer {} not found", payload.customer_id)))?;

    let mut locked = Vec::with_capacity(lines.len());
    for line in &lines {
        let product = Products::find_by_id(line.product_id)
            .filter(products::Column::DeletedAt.is_null())
            .lock(LockType::Update)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("product {} not found", line.product_id)))?;

        if !product_service::has_stock(&product, line.quantity) {
            return Err(AppError::InsufficientStock {
                name: product.name,
                requested: line.quantity,
                available: product.stock_quantity,
            });
        }
        let subtotal = line_subtotal(product.price, line.quantity)?;
        locked.push((product, line.quantity, subtotal));
    }

    let mut total_amount: i64 = 0;
    for (_, _, subtotal) in &locked {
        total_amount = total_amount
            .checked_add(*subtotal)
            .ok_or_else(overflow_error)?;
    }

    let order = orders::ActiveModel {
        id: Set(Uuid::new_v4()),
        customer_id: Set(customer.id),
        total_amount: Set(total_amount),
        status: Set(OrderStatus::Pending.as_str().to_string()),
        deleted_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items = Vec::with_capacity(locked.len());
    for (product, quantity, subtotal) in &locked {
        let item = order_items::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product.id),
            quantity: Set(*quantity),
            unit_price: Set(product.price),
            subtotal: Set(*subtotal),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(item);
    }

    for (product, quantity, _) in &locked {
        // The row is locked and the stock was just checked, so a zero-row
        // update here means the guard caught something the check missed.
        if !product_service::decrease_stock(&txn, product.id, *quantity).await? {
            return Err(AppError::InsufficientStock {
                name: product.name.clone(),
                requested: *quantity,
                available: product.stock_quantity,
            });
        }
    }

    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        customer_id = %customer.id,
        total_amount,
        items = items.len(),
        "order placed"
    );

    audit(
        state,
        "order.placed",
        &order.id,
        json!({
            "customer_id": customer.id,
            "total_amount": total_amount,
            "items": items.len(),
        }),
    )
    .await;

    let order = order_from_entity(order)?;
    state
        .notifier
        .order_confirmation(&order, Some(&customer.email))
        .await;

    Ok(ApiResponse::success(
        "Order placed",
        OrderWithItems {
            order,
            items: items.into_iter().map(item_from_entity).collect(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_order(state: &AppState, id: Uuid) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_active(&state.orm, id).await?;
    let items = OrderItems::find()
        .filter(order_items::Column::OrderId.eq(order.id))
        .order_by_asc(order_items::Column::CreatedAt)
        .all(&state.orm)
        .await?;

    Ok(ApiResponse::success(
        "Order retrieved",
        OrderWithItems {
            order: order_from_entity(order)?,
            items: items.into_iter().map(item_from_entity).collect(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, per_page, offset) = query.pagination.normalize();

    let mut select = Orders::find().filter(orders::Column::DeletedAt.is_null());

    if let Some(status) = query.status.as_deref() {
        let status = OrderStatus::parse(status)
            .ok_or_else(|| AppError::Validation(format!("unknown order status {status}")))?;
        select = select.filter(orders::Column::Status.eq(status.as_str()));
    }
    if let Some(customer_id) = query.customer_id {
        select = select.filter(orders::Column::CustomerId.eq(customer_id));
    }

    let total = select.clone().count(&state.orm).await? as i64;

    let select = match query.sort_order {
        Some(SortOrder::Asc) => select.order_by_asc(orders::Column::CreatedAt),
        _ => select.order_by_desc(orders::Column::CreatedAt),
    };

    let items = select
        .offset(offset as u64)
        .limit(per_page as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<AppResult<Vec<Order>>>()?;

    Ok(ApiResponse::success(
        "Orders retrieved",
        OrderList { items },
        Some(Meta::new(page, per_page, total)),
    ))
}

pub async fn update_order_status(
    state: &AppState,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    let order = find_active(&state.orm, id).await?;
    let from = order.status.clone();
    let order = transition_order(&state.orm, order, payload.status).await?;

    audit(
        state,
        "order.status_changed",
        &order.id,
        json!({ "from": from, "to": order.status }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order status updated",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

/// Cancel an order and return its reserved stock. Only pending and
/// processing orders are cancellable.
pub async fn cancel_order(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(id)
        .filter(orders::Column::DeletedAt.is_null())
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    let current = parse_status(&order)?;
    if !current.can_be_cancelled() {
        return Err(AppError::InvalidStateTransition {
            from: current.to_string(),
            to: OrderStatus::Cancelled.to_string(),
        });
    }

    let items = OrderItems::find()
        .filter(order_items::Column::OrderId.eq(order.id))
        .all(&txn)
        .await?;
    for item in &items {
        // A soft-deleted product keeps its stock; nothing to return.
        product_service::increase_stock(&txn, item.product_id, item.quantity).await?;
    }

    let order = transition_order(&txn, order, OrderStatus::Cancelled).await?;

    txn.commit().await?;

    tracing::info!(order_id = %order.id, restocked_items = items.len(), "order cancelled");

    audit(
        state,
        "order.cancelled",
        &order.id,
        json!({ "restocked_items": items.len() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order cancelled",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

// --- Helpers --------------------------------------------------------------

/// Line subtotal in minor units; an amount the i64 cannot carry is rejected
/// rather than wrapped.
fn line_subtotal(price: i64, quantity: i32) -> AppResult<i64> {
    price
        .checked_mul(i64::from(quantity))
        .ok_or_else(overflow_error)
}

fn overflow_error() -> AppError {
    AppError::Validation("order total exceeds the representable amount".into())
}

/// The single path for order status writes; rejects transitions the state
/// machine does not allow.
pub(crate) async fn transition_order<C>(
    conn: &C,
    order: orders::Model,
    next: OrderStatus,
) -> AppResult<orders::Model>
where
    C: ConnectionTrait,
{
    let current = parse_status(&order)?;
    if !current.can_transition_to(next) {
        return Err(AppError::InvalidStateTransition {
            from: current.to_string(),
            to: next.to_string(),
        });
    }

    let mut active: orders::ActiveModel = order.into();
    active.status = Set(next.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(conn).await?)
}

pub(crate) async fn find_active<C>(conn: &C, id: Uuid) -> AppResult<orders::Model>
where
    C: ConnectionTrait,
{
    Orders::find_by_id(id)
        .filter(orders::Column::DeletedAt.is_null())
        .one(conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
}

pub(crate) fn parse_status(order: &orders::Model) -> AppResult<OrderStatus> {
    OrderStatus::parse(&order.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "order {} carries unknown status {:?}",
            order.id,
            order.status
        ))
    })
}

pub(crate) fn order_from_entity(model: orders::Model) -> AppResult<Order> {
    let status = parse_status(&model)?;
    Ok(Order {
        id: model.id,
        customer_id: model.customer_id,
        total_amount: model.total_amount,
        status,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub(crate) fn item_from_entity(model: order_items::Model) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        unit_price: model.unit_price,
        subtotal: model.subtotal,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

pub(crate) async fn audit(state: &AppState, action: &str, id: &Uuid, metadata: serde_json::Value) {
    let resource = id.to_string();
    if let Err(err) = log_audit(&state.pool, action, Some(&resource), Some(metadata)).await {
        tracing::warn!(error = %err, action, "audit write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_subtotal_multiplies_minor_units() {
        assert_eq!(line_subtotal(10_000, 2).unwrap(), 20_000);
        assert_eq!(line_subtotal(0, 5).unwrap(), 0);
    }

    #[test]
    fn line_subtotal_rejects_overflow() {
        let err = line_subtotal(i64::MAX, 2).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
