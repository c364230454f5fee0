use chrono::Utc;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::json;
use uuid::Uuid;

use crate::audit::log_audit;
use crate::dto::products::{
    CreateProductRequest, ProductList, RestockRequest, UpdateProductRequest,
};
use crate::entity::products::{self, Entity as Products};
use crate::error::{AppError, AppResult};
use crate::models::Product;
use crate::response::{ApiResponse, Meta};
use crate::routes::params::{LowStockQuery, ProductQuery, SortOrder};
use crate::state::AppState;

// --- Inventory ledger -----------------------------------------------------
//
// Stock only moves through the operations below. Reads of `stock_quantity`
// elsewhere are advisory; the guarded update is the authority.

pub fn has_stock(product: &products::Model, quantity: i32) -> bool {
    product.stock_quantity >= quantity
}

/// Atomically decrement stock. The quantity guard rides in the WHERE clause,
/// so a concurrent decrement that would go negative simply matches zero rows.
/// `false` means insufficient stock and MUST abort the caller's transaction.
pub async fn decrease_stock<C>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, sea_orm::DbErr>
where
    C: ConnectionTrait,
{
    let result = Products::update_many()
        .col_expr(
            products::Column::StockQuantity,
            Expr::col(products::Column::StockQuantity).sub(quantity),
        )
        .col_expr(products::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(products::Column::Id.eq(product_id))
        .filter(products::Column::StockQuantity.gte(quantity))
        .filter(products::Column::DeletedAt.is_null())
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Unconditional stock add (restock, order cancellation). `false` means the
/// product does not exist or is soft-deleted.
pub async fn increase_stock<C>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, sea_orm::DbErr>
where
    C: ConnectionTrait,
{
    let result = Products::update_many()
        .col_expr(
            products::Column::StockQuantity,
            Expr::col(products::Column::StockQuantity).add(quantity),
        )
        .col_expr(products::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(products::Column::Id.eq(product_id))
        .filter(products::Column::DeletedAt.is_null())
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

// --- CRUD -----------------------------------------------------------------

pub async fn create_product(
    state: &AppState,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    let name = payload.name.trim();
    let sku = payload.sku.trim();
    if name.is_empty() {
        return Err(AppError::Validation("product name must not be empty".into()));
    }
    if sku.is_empty() {
        return Err(AppError::Validation("product SKU must not be empty".into()));
    }
    if payload.price < 0 {
        return Err(AppError::Validation("product price must not be negative".into()));
    }
    if payload.stock_quantity < 0 {
        return Err(AppError::Validation(
            "product stock quantity must not be negative".into(),
        ));
    }

    if find_by_sku(state, sku).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "product with SKU {sku} already exists"
        )));
    }

    let model = products::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        description: Set(payload.description),
        sku: Set(sku.to_string()),
        price: Set(payload.price),
        stock_quantity: Set(payload.stock_quantity),
        deleted_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    audit(state, "product.created", &model.id, json!({ "sku": model.sku })).await;

    Ok(ApiResponse::success(
        "Product created",
        product_from_entity(model),
        Some(Meta::empty()),
    ))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let model = find_active(state, id).await?;
    Ok(ApiResponse::success(
        "Product retrieved",
        product_from_entity(model),
        Some(Meta::empty()),
    ))
}

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, per_page, offset) = query.pagination.normalize();

    let mut select = Products::find().filter(products::Column::DeletedAt.is_null());

    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{q}%");
        select = select.filter(
            Condition::any()
                .add(Expr::col(products::Column::Name).ilike(pattern.clone()))
                .add(Expr::col(products::Column::Description).ilike(pattern.clone()))
                .add(Expr::col(products::Column::Sku).ilike(pattern)),
        );
    }

    let total = select.clone().count(&state.orm).await? as i64;

    let select = match query.sort_order {
        Some(SortOrder::Asc) => select.order_by_asc(products::Column::CreatedAt),
        _ => select.order_by_desc(products::Column::CreatedAt),
    };

    let items = select
        .offset(offset as u64)
        .limit(per_page as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Products retrieved",
        ProductList { items },
        Some(Meta::new(page, per_page, total)),
    ))
}

pub async fn list_low_stock(
    state: &AppState,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, per_page, offset) = query.pagination.normalize();
    let threshold = query.threshold.unwrap_or(10).max(1);

    let select = Products::find()
        .filter(products::Column::DeletedAt.is_null())
        .filter(products::Column::StockQuantity.lte(threshold))
        .filter(products::Column::StockQuantity.gt(0));

    let total = select.clone().count(&state.orm).await? as i64;

    let items = select
        .order_by_asc(products::Column::StockQuantity)
        .offset(offset as u64)
        .limit(per_page as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Low-stock products retrieved",
        ProductList { items },
        Some(Meta::new(page, per_page, total)),
    ))
}

pub async fn update_product(
    state: &AppState,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    let model = find_active(state, id).await?;
    let mut active: products::ActiveModel = model.into();

    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("product name must not be empty".into()));
        }
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        if price < 0 {
            return Err(AppError::Validation("product price must not be negative".into()));
        }
        active.price = Set(price);
    }
    active.updated_at = Set(Utc::now().into());

    let model = active.update(&state.orm).await?;

    audit(state, "product.updated", &model.id, json!({ "sku": model.sku })).await;

    Ok(ApiResponse::success(
        "Product updated",
        product_from_entity(model),
        Some(Meta::empty()),
    ))
}

pub async fn restock_product(
    state: &AppState,
    id: Uuid,
    payload: RestockRequest,
) -> AppResult<ApiResponse<Product>> {
    if payload.quantity < 1 {
        return Err(AppError::Validation(
            "restock quantity must be at least 1".into(),
        ));
    }

    if !increase_stock(&state.orm, id, payload.quantity).await? {
        return Err(AppError::NotFound(format!("product {id} not found")));
    }
    let model = find_active(state, id).await?;

    audit(
        state,
        "product.restocked",
        &model.id,
        json!({ "quantity": payload.quantity, "stock_quantity": model.stock_quantity }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product restocked",
        product_from_entity(model),
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let model = find_active(state, id).await?;
    let mut active: products::ActiveModel = model.into();
    active.deleted_at = Set(Some(Utc::now().into()));
    active.updated_at = Set(Utc::now().into());
    let model = active.update(&state.orm).await?;

    audit(state, "product.deleted", &model.id, json!({ "sku": model.sku })).await;

    Ok(ApiResponse::success(
        "Product deleted",
        product_from_entity(model),
        Some(Meta::empty()),
    ))
}

// --- Helpers --------------------------------------------------------------

async fn find_active(state: &AppState, id: Uuid) -> AppResult<products::Model> {
    Products::find_by_id(id)
        .filter(products::Column::DeletedAt.is_null())
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {id} not found")))
}

async fn find_by_sku(state: &AppState, sku: &str) -> AppResult<Option<products::Model>> {
    Ok(Products::find()
        .filter(products::Column::Sku.eq(sku))
        .filter(products::Column::DeletedAt.is_null())
        .one(&state.orm)
        .await?)
}

async fn audit(state: &AppState, action: &str, id: &Uuid, metadata: serde_json::Value) {
    let resource = id.to_string();
    if let Err(err) = log_audit(&state.pool, action, Some(&resource), Some(metadata)).await {
        tracing::warn!(error = %err, action, "audit write failed");
    }
}

pub(crate) fn product_from_entity(model: products::Model) -> Product {
    Product {
        id: model.id,
        name: model.name,
        description: model.description,
        sku: model.sku,
        price: model.price,
        stock_quantity: model.stock_quantity,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(stock: i32) -> products::Model {
        let now = Utc::now().into();
        products::Model {
            id: Uuid::new_v4(),
            name: "Widget".into(),
            description: None,
            sku: "WID-1".into(),
            price: 10_000,
            stock_quantity: stock,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn stock_check_is_inclusive() {
        assert!(has_stock(&product(5), 5));
        assert!(has_stock(&product(5), 1));
        assert!(!has_stock(&product(5), 6));
        assert!(!has_stock(&product(0), 1));
    }
}
