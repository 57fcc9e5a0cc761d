//! PostgreSQL adapters
//!
//! The cart is stored as one row per user: line items as JSONB next to the
//! derived totals and a version column. Every write is a single conditional
//! statement, so items and totals can never be persisted apart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartLineItem, Product, ProductSummary, SellerOffer};
use crate::domain::value_objects::{ProductId, UserId};
use crate::ports::{CartRepository, ProductCatalog, StorageError};

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    name: String,
    images: Vec<String>,
    offers: Json<Vec<SellerOffer>>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StorageError;
    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let id = ProductId::new(row.id).map_err(|e| StorageError::Backend(format!("Corrupt product row: {e}")))?;
        Ok(Product::new(id, row.name, row.images, row.offers.0))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    id: String,
    name: String,
    image: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: Uuid,
    items: Json<Vec<CartLineItem>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn backend(context: &str) -> impl Fn(sqlx::Error) -> StorageError + '_ {
    move |e| StorageError::Backend(format!("{context}: {e}"))
}

/// Catalog backed by the `products` table.
#[derive(Clone)]
pub struct PgProductCatalog {
    pool: PgPool,
}

impl PgProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductCatalog for PgProductCatalog {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, StorageError> {
        sqlx::query_as::<_, ProductRow>("SELECT id, name, images, offers FROM products WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("Failed to fetch product"))?
            .map(Product::try_from)
            .transpose()
    }

    async fn find_summaries(&self, ids: &[ProductId]) -> Result<Vec<ProductSummary>, StorageError> {
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, SummaryRow>("SELECT id, name, images[1] AS image FROM products WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(backend("Failed to fetch product summaries"))?;

        rows.into_iter()
            .map(|r| {
                let id = ProductId::new(r.id).map_err(|e| StorageError::Backend(format!("Corrupt product row: {e}")))?;
                Ok(ProductSummary { id, name: r.name, image: r.image })
            })
            .collect()
    }
}

/// Versioned cart store backed by the `carts` table.
#[derive(Clone)]
pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartRepository for PgCartRepository {
    async fn find_by_user(&self, user_id: &UserId) -> Result<Option<Cart>, StorageError> {
        let row = sqlx::query_as::<_, CartRow>(
            "SELECT id, items, version, created_at, updated_at FROM carts WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to fetch cart"))?;

        Ok(row.map(|r| Cart::restore(r.id, user_id.clone(), r.items.0, r.version as u64, r.created_at, r.updated_at)))
    }

    async fn save(&self, cart: &Cart) -> Result<u64, StorageError> {
        let items = Json(cart.items().to_vec());
        let total_price: Decimal = cart.total_price().amount();
        let total_discounted_price: Decimal = cart.total_discounted_price().amount();

        let result = if cart.is_persisted() {
            sqlx::query(
                r#"
                UPDATE carts SET
                    items = $2,
                    total_price = $3,
                    total_discounted_price = $4,
                    version = version + 1,
                    updated_at = $5
                WHERE user_id = $1 AND version = $6
                "#,
            )
            .bind(cart.user_id().as_str())
            .bind(items)
            .bind(total_price)
            .bind(total_discounted_price)
            .bind(cart.updated_at())
            .bind(cart.version() as i64)
            .execute(&self.pool)
            .await
            .map_err(backend("Failed to update cart"))?
        } else {
            sqlx::query(
                r#"
                INSERT INTO carts (
                    id, user_id, items, total_price, total_discounted_price, version, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, 1, $6, $7)
                ON CONFLICT (user_id) DO NOTHING
                "#,
            )
            .bind(cart.id())
            .bind(cart.user_id().as_str())
            .bind(items)
            .bind(total_price)
            .bind(total_discounted_price)
            .bind(cart.created_at())
            .bind(cart.updated_at())
            .execute(&self.pool)
            .await
            .map_err(backend("Failed to insert cart"))?
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(cart.version() + 1)
    }
}
