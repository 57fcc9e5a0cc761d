//! Ports - contracts between the cart core and its collaborators.
//!
//! - `ProductCatalog` - read-only product/offer lookups
//! - `CartRepository` - versioned persistence of the cart aggregate
//! - `EventPublisher` - fan-out of cart events after a successful write

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::aggregates::{Cart, Product, ProductSummary, SellerOffer};
use crate::domain::events::CartEvent;
use crate::domain::value_objects::{ProductId, SellerId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The stored cart moved on since it was read.
    #[error("cart was modified concurrently")]
    Conflict,

    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error)]
#[error("failed to publish event: {0}")]
pub struct PublishError(pub String);

/// Read-only access to the product catalog.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, StorageError>;

    /// Display summaries for the given products. Unknown ids are skipped.
    async fn find_summaries(&self, ids: &[ProductId]) -> Result<Vec<ProductSummary>, StorageError>;

    fn find_seller_offer<'a>(&self, product: &'a Product, seller_id: &SellerId) -> Option<&'a SellerOffer> {
        product.seller_offer(seller_id)
    }
}

/// Persistence port for the Cart aggregate.
///
/// Implementations must write items, both totals and the version in one
/// atomic, conditional operation.
#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn find_by_user(&self, user_id: &UserId) -> Result<Option<Cart>, StorageError>;

    /// Persist `cart` and return its new version.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the cart is new but a row already exists for the user,
    ///   or if the stored version differs from `cart.version()`
    /// - `Backend` on I/O failure
    async fn save(&self, cart: &Cart) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &CartEvent) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_are_object_safe() {
        fn _catalog(_: &dyn ProductCatalog) {}
        fn _carts(_: &dyn CartRepository) {}
        fn _events(_: &dyn EventPublisher) {}
    }
}
