//! In-memory adapters
//!
//! Stores products and carts in memory. Used when no database is configured
//! and throughout the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartLineItem, Product, ProductSummary};
use crate::domain::value_objects::{ProductId, UserId};
use crate::ports::{CartRepository, ProductCatalog, StorageError};

/// In-memory product catalog
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductCatalog {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
}

impl InMemoryProductCatalog {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        let products = products.into_iter().map(|p| (p.id().clone(), p)).collect();
        Self { products: Arc::new(RwLock::new(products)) }
    }

    /// Load a catalog from a JSON array of products.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let raw = tokio::fs::read(path.as_ref())
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to read catalog seed: {e}")))?;
        let products: Vec<Product> = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Backend(format!("Invalid catalog seed: {e}")))?;
        Ok(Self::new(products))
    }

    /// Insert or replace a product.
    pub async fn upsert(&self, product: Product) {
        self.products.write().await.insert(product.id().clone(), product);
    }

    pub async fn len(&self) -> usize {
        self.products.read().await.len()
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, StorageError> {
        Ok(self.products.read().await.get(id).cloned())
    }

    async fn find_summaries(&self, ids: &[ProductId]) -> Result<Vec<ProductSummary>, StorageError> {
        let products = self.products.read().await;
        Ok(ids.iter().filter_map(|id| products.get(id)).map(Product::summary).collect())
    }
}

#[derive(Debug, Clone)]
struct StoredCart {
    id: Uuid,
    items: Vec<CartLineItem>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory cart store with the same compare-and-swap semantics as the
/// PostgreSQL adapter.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartRepository {
    carts: Arc<RwLock<HashMap<UserId, StoredCart>>>,
}

impl InMemoryCartRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.carts.read().await.is_empty()
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn find_by_user(&self, user_id: &UserId) -> Result<Option<Cart>, StorageError> {
        let carts = self.carts.read().await;
        Ok(carts.get(user_id).map(|s| {
            Cart::restore(s.id, user_id.clone(), s.items.clone(), s.version, s.created_at, s.updated_at)
        }))
    }

    async fn save(&self, cart: &Cart) -> Result<u64, StorageError> {
        let mut carts = self.carts.write().await;
        let stored_version = carts.get(cart.user_id()).map(|s| s.version);
        let expected = if cart.is_persisted() { Some(cart.version()) } else { None };
        if stored_version != expected {
            return Err(StorageError::Conflict);
        }

        let version = cart.version() + 1;
        carts.insert(cart.user_id().clone(), StoredCart {
            id: cart.id(),
            items: cart.items().to_vec(),
            version,
            created_at: cart.created_at(),
            updated_at: cart.updated_at(),
        });
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{LineKey, PriceSize, SellerOffer};
    use crate::domain::value_objects::SellerId;
    use rust_decimal::Decimal;
    use std::io::Write;

    fn cart_with_item(user: &str) -> Cart {
        let mut cart = Cart::new(UserId::new(user).unwrap());
        let key = LineKey {
            product_id: ProductId::new("P1").unwrap(),
            selected_size: "1kg".into(),
            seller_id: SellerId::new("S1").unwrap(),
        };
        let ps = PriceSize::new("1kg", Decimal::new(10, 0), Decimal::new(8, 0), 10).unwrap();
        cart.add_item(key, &ps, 2).unwrap();
        cart
    }

    #[tokio::test]
    async fn save_bumps_version_and_round_trips() {
        let repo = InMemoryCartRepository::new();
        let mut cart = cart_with_item("U1");
        let v1 = repo.save(&cart).await.unwrap();
        assert_eq!(v1, 1);
        cart.mark_persisted(v1);

        let loaded = repo.find_by_user(cart.user_id()).await.unwrap().unwrap();
        assert_eq!(loaded.items(), cart.items());
        assert_eq!(loaded.total_price(), cart.total_price());
        assert_eq!(loaded.version(), 1);
    }

    #[tokio::test]
    async fn stale_writes_conflict() {
        let repo = InMemoryCartRepository::new();
        let cart = cart_with_item("U1");
        repo.save(&cart).await.unwrap();

        // a second fresh cart for the same user
        assert_eq!(repo.save(&cart_with_item("U1")).await, Err(StorageError::Conflict));

        let mut a = repo.find_by_user(cart.user_id()).await.unwrap().unwrap();
        let mut b = a.clone();
        a.clear();
        repo.save(&a).await.unwrap();
        b.clear();
        assert_eq!(repo.save(&b).await, Err(StorageError::Conflict));
    }

    #[tokio::test]
    async fn catalog_loads_from_json_seed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"P1","name":"Onion Seeds","images":["onion.jpg"],
                "offers":[{{"sellerId":"S1","fullShopDetails":"Farm","priceSizes":[
                    {{"size":"250g","price":40,"discountedPrice":35,"quantity":12}}]}}]}}]"#
        )
        .unwrap();

        let catalog = InMemoryProductCatalog::from_json_file(file.path()).await.unwrap();
        assert_eq!(catalog.len().await, 1);
        let product = catalog.find_by_id(&ProductId::new("P1").unwrap()).await.unwrap().unwrap();
        let offer: &SellerOffer = catalog.find_seller_offer(&product, &SellerId::new("S1").unwrap()).unwrap();
        assert_eq!(offer.price_size("250g").unwrap().quantity(), 12);

        let summaries = catalog
            .find_summaries(&[ProductId::new("P1").unwrap(), ProductId::new("P404").unwrap()])
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].image.as_deref(), Some("onion.jpg"));
    }
}
