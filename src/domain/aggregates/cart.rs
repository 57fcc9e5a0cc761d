//! Cart Aggregate
//!
//! One cart per user. A line is identified by (product, size, seller); totals
//! are only ever derived from the lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::product::PriceSize;
use crate::domain::events::CartEvent;
use crate::domain::value_objects::{ItemId, Money, ProductId, SellerId, UserId};

/// Uniqueness key of a cart line.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LineKey {
    pub product_id: ProductId,
    pub selected_size: String,
    pub seller_id: SellerId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub id: ItemId,
    pub product_id: ProductId,
    pub seller_id: SellerId,
    #[serde(rename = "selectedsize", alias = "selectedSize")]
    pub selected_size: String,
    pub quantity: u32,
    pub selected_price: Money,
    pub selected_discounted_price: Money,
}

impl CartLineItem {
    pub fn line_total(&self) -> Money { self.selected_price.multiply(self.quantity) }
    pub fn line_discounted_total(&self) -> Money { self.selected_discounted_price.multiply(self.quantity) }

    fn matches(&self, key: &LineKey) -> bool {
        self.product_id == key.product_id && self.selected_size == key.selected_size && self.seller_id == key.seller_id
    }
}

#[derive(Clone, Debug)]
pub struct Cart {
    id: Uuid,
    user_id: UserId,
    items: Vec<CartLineItem>,
    total_price: Money,
    total_discounted_price: Money,
    version: u64,
    dirty: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<CartEvent>,
}

impl Cart {
    /// A fresh, not yet persisted cart (version 0).
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), user_id, items: vec![], total_price: Money::ZERO,
            total_discounted_price: Money::ZERO, version: 0, dirty: false,
            created_at: now, updated_at: now, events: vec![],
        }
    }

    /// Rebuild a persisted cart. Stored totals are ignored and derived again.
    pub fn restore(id: Uuid, user_id: UserId, items: Vec<CartLineItem>, version: u64, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        let mut cart = Self {
            id, user_id, items, total_price: Money::ZERO, total_discounted_price: Money::ZERO,
            version, dirty: false, created_at, updated_at, events: vec![],
        };
        cart.recalculate_totals();
        cart
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn user_id(&self) -> &UserId { &self.user_id }
    pub fn items(&self) -> &[CartLineItem] { &self.items }
    pub fn total_price(&self) -> Money { self.total_price }
    pub fn total_discounted_price(&self) -> Money { self.total_discounted_price }
    pub fn version(&self) -> u64 { self.version }
    pub fn is_persisted(&self) -> bool { self.version > 0 }
    /// True when the cart changed since it was loaded or last persisted.
    pub fn is_dirty(&self) -> bool { self.dirty }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    /// Adds `quantity` to the line for `key`, creating it when absent.
    ///
    /// The resulting quantity is capped at the stock of `price_size`. When the
    /// cap applies the capped state is kept and `StockExceeded` is returned.
    pub fn add_item(&mut self, key: LineKey, price_size: &PriceSize, quantity: u32) -> Result<ItemId, CartError> {
        let idx = self.position(&key);
        let requested = match idx {
            Some(i) => self.items[i].quantity.saturating_add(quantity),
            None => quantity,
        };
        self.place(key, idx, price_size, requested)
    }

    /// Sets the line for `key` to exactly `quantity`. Zero removes the line.
    pub fn set_quantity(&mut self, key: LineKey, price_size: &PriceSize, quantity: u32) -> Result<Option<ItemId>, CartError> {
        if quantity == 0 {
            self.remove_line(&key);
            return Ok(None);
        }
        let idx = self.position(&key);
        self.place(key, idx, price_size, quantity).map(Some)
    }

    /// Removes the line for `key`, if there is one.
    pub fn remove_line(&mut self, key: &LineKey) -> Option<CartLineItem> {
        let idx = self.position(key)?;
        Some(self.remove_at(idx))
    }

    pub fn remove_item(&mut self, item_id: ItemId) -> Result<CartLineItem, CartError> {
        let idx = self.items.iter().position(|i| i.id == item_id).ok_or(CartError::ItemNotFound)?;
        Ok(self.remove_at(idx))
    }

    pub fn clear(&mut self) {
        if self.items.is_empty() { return; }
        self.items.clear();
        self.raise_event(CartEvent::Cleared { cart_id: self.id, user_id: self.user_id.clone() });
        self.recalculate();
    }

    pub fn mark_persisted(&mut self, version: u64) { self.version = version; self.dirty = false; }
    pub fn take_events(&mut self) -> Vec<CartEvent> { std::mem::take(&mut self.events) }

    fn place(&mut self, key: LineKey, idx: Option<usize>, price_size: &PriceSize, requested: u32) -> Result<ItemId, CartError> {
        let ceiling = price_size.quantity();
        let quantity = requested.min(ceiling);
        let clamped = quantity < requested;
        if quantity == 0 && idx.is_none() {
            return Err(CartError::StockExceeded { ceiling });
        }
        if clamped {
            self.raise_event(CartEvent::StockClamped {
                cart_id: self.id, user_id: self.user_id.clone(), product_id: key.product_id.clone(),
                seller_id: key.seller_id.clone(), size: key.selected_size.clone(), requested, ceiling,
            });
        }
        if quantity == 0 {
            if let Some(i) = idx { self.remove_at(i); }
            return Err(CartError::StockExceeded { ceiling });
        }

        let item_id = match idx {
            Some(i) => {
                let item = &mut self.items[i];
                let from = item.quantity;
                item.quantity = quantity;
                item.selected_price = price_size.price();
                item.selected_discounted_price = price_size.discounted_price();
                let item_id = item.id;
                self.raise_event(CartEvent::QuantityChanged { cart_id: self.id, user_id: self.user_id.clone(), item_id, from, to: quantity });
                item_id
            }
            None => {
                let item_id = ItemId::generate();
                self.raise_event(CartEvent::ItemAdded {
                    cart_id: self.id, user_id: self.user_id.clone(), item_id, product_id: key.product_id.clone(),
                    seller_id: key.seller_id.clone(), size: key.selected_size.clone(), quantity,
                });
                self.items.push(CartLineItem {
                    id: item_id, product_id: key.product_id, seller_id: key.seller_id, selected_size: key.selected_size,
                    quantity, selected_price: price_size.price(), selected_discounted_price: price_size.discounted_price(),
                });
                item_id
            }
        };
        self.recalculate();
        if clamped { Err(CartError::StockExceeded { ceiling }) } else { Ok(item_id) }
    }

    fn position(&self, key: &LineKey) -> Option<usize> { self.items.iter().position(|i| i.matches(key)) }

    fn remove_at(&mut self, idx: usize) -> CartLineItem {
        let item = self.items.remove(idx);
        self.raise_event(CartEvent::ItemRemoved { cart_id: self.id, user_id: self.user_id.clone(), item_id: item.id });
        self.recalculate();
        item
    }

    fn recalculate(&mut self) {
        self.recalculate_totals();
        self.dirty = true;
        self.updated_at = Utc::now();
    }

    fn recalculate_totals(&mut self) {
        self.total_price = self.items.iter().fold(Money::ZERO, |acc, i| acc.add(&i.line_total()));
        self.total_discounted_price = self.items.iter().fold(Money::ZERO, |acc, i| acc.add(&i.line_discounted_total()));
    }

    fn raise_event(&mut self, e: CartEvent) { self.events.push(e); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ItemNotFound, StockExceeded { ceiling: u32 } }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound => write!(f, "Item not found"),
            Self::StockExceeded { ceiling } => write!(f, "Only {ceiling} in stock"),
        }
    }
}
