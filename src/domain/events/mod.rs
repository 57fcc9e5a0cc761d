//! Domain events
use crate::domain::value_objects::{ItemId, ProductId, SellerId, UserId};
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    ItemAdded { cart_id: Uuid, user_id: UserId, item_id: ItemId, product_id: ProductId, seller_id: SellerId, size: String, quantity: u32 },
    QuantityChanged { cart_id: Uuid, user_id: UserId, item_id: ItemId, from: u32, to: u32 },
    ItemRemoved { cart_id: Uuid, user_id: UserId, item_id: ItemId },
    Cleared { cart_id: Uuid, user_id: UserId },
    StockClamped { cart_id: Uuid, user_id: UserId, product_id: ProductId, seller_id: SellerId, size: String, requested: u32, ceiling: u32 },
}

impl CartEvent {
    /// Short name, used as the last segment of the publish subject.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ItemAdded { .. } => "item_added",
            Self::QuantityChanged { .. } => "quantity_changed",
            Self::ItemRemoved { .. } => "item_removed",
            Self::Cleared { .. } => "cleared",
            Self::StockClamped { .. } => "stock_clamped",
        }
    }

    pub fn user_id(&self) -> &UserId {
        match self {
            Self::ItemAdded { user_id, .. }
            | Self::QuantityChanged { user_id, .. }
            | Self::ItemRemoved { user_id, .. }
            | Self::Cleared { user_id, .. }
            | Self::StockClamped { user_id, .. } => user_id,
        }
    }
}
