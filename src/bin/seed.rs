use axum_orders_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let customer_id = ensure_customer(&pool, "Ada Lovelace", "ada@example.com").await?;
    ensure_customer(&pool, "Grace Hopper", "grace@example.com").await?;
    seed_products(&pool).await?;

    println!("Seed completed. Customer ID: {customer_id}");
    Ok(())
}

async fn ensure_customer(pool: &sqlx::PgPool, name: &str, email: &str) -> anyhow::Result<Uuid> {
    let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM customers WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    if let Some((id,)) = row {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO customers (id, name, email) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    Ok(id)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    // Prices are minor units (cents).
    let products: [(&str, &str, i64, i32); 4] = [
        ("Mechanical Keyboard", "KB-MX-87", 12_900, 40),
        ("Laser Mouse", "MS-LZ-01", 4_500, 120),
        ("USB-C Dock", "DK-UC-11", 18_900, 15),
        ("4K Monitor", "MN-4K-27", 32_900, 8),
    ];

    for (name, sku, price, stock) in products {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE sku = $1")
            .bind(sku)
            .fetch_optional(pool)
            .await?;
        if exists.is_some() {
            continue;
        }
        sqlx::query(
            "INSERT INTO products (id, name, sku, price, stock_quantity) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(sku)
        .bind(price)
        .bind(stock)
        .execute(pool)
        .await?;
    }

    Ok(())
}
