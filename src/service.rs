//! Cart service - the operation surface used by the HTTP layer and checkout.
//!
//! Every mutation is one read-modify-write of the user's cart, committed with a
//! conditional write. On a version conflict the cart is reloaded and the
//! operation applied again, up to `max_write_retries` times.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartError, LineKey, PriceSize};
use crate::domain::value_objects::{ItemId, ProductId, SellerId, UserId};
use crate::ports::{CartRepository, EventPublisher, ProductCatalog, StorageError};
use crate::{CartServiceError, Resource, Result};

pub const DEFAULT_MAX_WRITE_RETRIES: u32 = 3;

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone)]
pub struct AddToCart {
    pub product_id: ProductId,
    pub selected_size: String,
    pub seller_id: SellerId,
    pub quantity: u32,
}

/// Absolute quantity update. Values below 1 remove the line.
#[derive(Debug, Clone)]
pub struct UpdateQuantity {
    pub product_id: ProductId,
    pub selected_size: String,
    pub seller_id: SellerId,
    pub new_quantity: i64,
}

// =============================================================================
// Views
// =============================================================================

/// Cart as presented to callers, lines joined with product display fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: Option<Uuid>,
    pub user_id: UserId,
    pub items: Vec<CartItemView>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_discounted_price: Decimal,
    pub version: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemView {
    pub id: ItemId,
    pub product_id: ProductId,
    pub product_name: Option<String>,
    pub product_image: Option<String>,
    pub seller_id: SellerId,
    #[serde(rename = "selectedsize")]
    pub selected_size: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub selected_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub selected_discounted_price: Decimal,
}

impl CartView {
    /// The shape returned when a user has no stored cart.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            id: None, user_id, items: vec![], total_price: Decimal::ZERO,
            total_discounted_price: Decimal::ZERO, version: 0,
        }
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct CartService {
    catalog: Arc<dyn ProductCatalog>,
    carts: Arc<dyn CartRepository>,
    events: Arc<dyn EventPublisher>,
    max_write_retries: u32,
}

impl CartService {
    pub fn new(catalog: Arc<dyn ProductCatalog>, carts: Arc<dyn CartRepository>, events: Arc<dyn EventPublisher>) -> Self {
        Self { catalog, carts, events, max_write_retries: DEFAULT_MAX_WRITE_RETRIES }
    }

    pub fn with_max_write_retries(mut self, retries: u32) -> Self {
        self.max_write_retries = retries;
        self
    }

    #[tracing::instrument(skip(self, cmd), fields(user_id = %user_id, product_id = %cmd.product_id))]
    pub async fn add_to_cart(&self, user_id: &UserId, cmd: AddToCart) -> Result<CartView> {
        if cmd.quantity == 0 {
            return Err(CartServiceError::validation("quantity", "must be at least 1"));
        }
        let key = line_key(cmd.product_id, &cmd.selected_size, cmd.seller_id)?;
        let price_size = self.resolve_price_size(&key).await?;
        let quantity = cmd.quantity;

        let view = self.mutate(user_id, true, |cart| cart.add_item(key.clone(), &price_size, quantity).map(|_| ())).await?;
        info!(quantity, "Item added to cart");
        Ok(view)
    }

    #[tracing::instrument(skip(self, cmd), fields(user_id = %user_id, product_id = %cmd.product_id))]
    pub async fn update_quantity(&self, user_id: &UserId, cmd: UpdateQuantity) -> Result<CartView> {
        let key = line_key(cmd.product_id, &cmd.selected_size, cmd.seller_id)?;

        if cmd.new_quantity < 1 {
            let result = self.mutate(user_id, false, |cart| { cart.remove_line(&key); Ok(()) }).await;
            return match result {
                Err(CartServiceError::NotFound(Resource::Cart)) => Ok(CartView::empty(user_id.clone())),
                other => other,
            };
        }

        let quantity = u32::try_from(cmd.new_quantity)
            .map_err(|_| CartServiceError::validation("newQuantity", "is too large"))?;
        let price_size = self.resolve_price_size(&key).await?;

        let view = self.mutate(user_id, true, |cart| cart.set_quantity(key.clone(), &price_size, quantity).map(|_| ())).await?;
        info!(quantity, "Cart quantity updated");
        Ok(view)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn remove_item(&self, user_id: &UserId, item_id: &str) -> Result<CartView> {
        let item_id: ItemId = item_id.parse()?;
        let view = self.mutate(user_id, false, |cart| cart.remove_item(item_id).map(|_| ())).await?;
        info!(%item_id, "Item removed from cart");
        Ok(view)
    }

    /// Empties the cart. Clearing an absent or empty cart succeeds.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn clear_cart(&self, user_id: &UserId) -> Result<CartView> {
        match self.mutate(user_id, false, |cart| { cart.clear(); Ok(()) }).await {
            Err(CartServiceError::NotFound(Resource::Cart)) => Ok(CartView::empty(user_id.clone())),
            other => {
                if other.is_ok() { info!("Cart cleared"); }
                other
            }
        }
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_cart(&self, user_id: &UserId) -> Result<CartView> {
        match self.carts.find_by_user(user_id).await? {
            Some(cart) => self.view(&cart).await,
            None => Ok(CartView::empty(user_id.clone())),
        }
    }

    /// Immutable snapshot for order creation. Its `version` must be handed
    /// back to [`CartService::complete_checkout`].
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn checkout_snapshot(&self, user_id: &UserId) -> Result<CartView> {
        let cart = self.carts.find_by_user(user_id).await?.ok_or(CartServiceError::NotFound(Resource::Cart))?;
        if cart.is_empty() {
            return Err(CartServiceError::validation("cart", "is empty"));
        }
        self.view(&cart).await
    }

    /// Clears the cart after an order was created from the snapshot taken at
    /// `version`. Fails if the cart changed since.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn complete_checkout(&self, user_id: &UserId, version: u64) -> Result<CartView> {
        let mut cart = self.carts.find_by_user(user_id).await?.ok_or(CartServiceError::NotFound(Resource::Cart))?;
        if cart.version() != version {
            warn!(expected = version, actual = cart.version(), "Cart changed after checkout snapshot");
            return Err(StorageError::Conflict.into());
        }
        cart.clear();
        if cart.is_dirty() {
            let version = self.carts.save(&cart).await?;
            cart.mark_persisted(version);
        }
        self.publish(&mut cart).await;
        info!("Cart cleared after checkout");
        self.view(&cart).await
    }

    async fn resolve_price_size(&self, key: &LineKey) -> Result<PriceSize> {
        let product = self.catalog.find_by_id(&key.product_id).await?
            .ok_or(CartServiceError::NotFound(Resource::Product))?;
        let offer = self.catalog.find_seller_offer(&product, &key.seller_id)
            .ok_or(CartServiceError::NotFound(Resource::Seller))?;
        offer.price_size(&key.selected_size).cloned().ok_or(CartServiceError::NotFound(Resource::Size))
    }

    async fn mutate<F>(&self, user_id: &UserId, create_missing: bool, mut apply: F) -> Result<CartView>
    where
        F: FnMut(&mut Cart) -> std::result::Result<(), CartError> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut cart = match self.carts.find_by_user(user_id).await? {
                Some(cart) => cart,
                None if create_missing => Cart::new(user_id.clone()),
                None => return Err(CartServiceError::NotFound(Resource::Cart)),
            };

            let outcome = apply(&mut cart);
            if cart.is_dirty() {
                match self.carts.save(&cart).await {
                    Ok(version) => cart.mark_persisted(version),
                    Err(StorageError::Conflict) if attempt < self.max_write_retries => {
                        attempt += 1;
                        debug!(attempt, "Cart version conflict, retrying");
                        continue;
                    }
                    Err(StorageError::Conflict) => {
                        warn!(attempts = attempt + 1, "Cart write retries exhausted");
                        return Err(StorageError::Conflict.into());
                    }
                    Err(e) => return Err(e.into()),
                }
                self.publish(&mut cart).await;
            }

            let view = self.view(&cart).await?;
            return match outcome {
                Ok(()) => Ok(view),
                Err(CartError::StockExceeded { ceiling }) => {
                    warn!(ceiling, "Requested quantity capped at stock");
                    Err(CartServiceError::StockExceeded { ceiling, cart: Box::new(view) })
                }
                Err(CartError::ItemNotFound) => Err(CartServiceError::NotFound(Resource::Item)),
            };
        }
    }

    async fn publish(&self, cart: &mut Cart) {
        for event in cart.take_events() {
            if let Err(e) = self.events.publish(&event).await {
                warn!(error = %e, event = event.name(), "Cart event not published");
            }
        }
    }

    async fn view(&self, cart: &Cart) -> Result<CartView> {
        let mut ids: Vec<ProductId> = cart.items().iter().map(|i| i.product_id.clone()).collect();
        ids.sort();
        ids.dedup();
        let summaries: HashMap<ProductId, _> = if ids.is_empty() {
            HashMap::new()
        } else {
            self.catalog.find_summaries(&ids).await?.into_iter().map(|s| (s.id.clone(), s)).collect()
        };

        let items = cart.items().iter().map(|item| {
            let summary = summaries.get(&item.product_id);
            CartItemView {
                id: item.id,
                product_id: item.product_id.clone(),
                product_name: summary.map(|s| s.name.clone()),
                product_image: summary.and_then(|s| s.image.clone()),
                seller_id: item.seller_id.clone(),
                selected_size: item.selected_size.clone(),
                quantity: item.quantity,
                selected_price: item.selected_price.amount(),
                selected_discounted_price: item.selected_discounted_price.amount(),
            }
        }).collect();

        Ok(CartView {
            id: cart.is_persisted().then(|| cart.id()),
            user_id: cart.user_id().clone(),
            items,
            total_price: cart.total_price().amount(),
            total_discounted_price: cart.total_discounted_price().amount(),
            version: cart.version(),
        })
    }
}

fn line_key(product_id: ProductId, selected_size: &str, seller_id: SellerId) -> Result<LineKey> {
    let selected_size = selected_size.trim();
    if selected_size.is_empty() {
        return Err(CartServiceError::validation("selectedSize", "is required"));
    }
    Ok(LineKey { product_id, selected_size: selected_size.to_string(), seller_id })
}
