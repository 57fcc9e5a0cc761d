//! Product catalog read model
//!
//! A product may be listed by several sellers, each with its own size/price
//! schedule. The cart only ever reads these records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{Money, ProductId, SellerId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    id: ProductId,
    name: String,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    offers: Vec<SellerOffer>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerOffer {
    pub seller_id: SellerId,
    #[serde(default)]
    pub full_shop_details: String,
    pub price_sizes: Vec<PriceSize>,
}

/// One size variant of a seller offer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPriceSize")]
pub struct PriceSize {
    size: String,
    price: Money,
    discounted_price: Money,
    quantity: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPriceSize {
    size: String,
    price: Decimal,
    discounted_price: Decimal,
    quantity: u32,
}

impl TryFrom<RawPriceSize> for PriceSize {
    type Error = ProductError;
    fn try_from(raw: RawPriceSize) -> Result<Self, Self::Error> {
        PriceSize::new(raw.size, raw.price, raw.discounted_price, raw.quantity)
    }
}

/// Minimal display fields joined onto cart lines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: ProductId,
    pub name: String,
    pub image: Option<String>,
}

impl PriceSize {
    pub fn new(size: impl Into<String>, price: Decimal, discounted_price: Decimal, quantity: u32) -> Result<Self, ProductError> {
        let size = size.into();
        if size.trim().is_empty() { return Err(ProductError::MissingSize); }
        let price = Money::new(price).map_err(|_| ProductError::NegativePrice)?;
        let discounted_price = Money::new(discounted_price).map_err(|_| ProductError::NegativePrice)?;
        if discounted_price > price { return Err(ProductError::DiscountAbovePrice { size }); }
        Ok(Self { size, price, discounted_price, quantity })
    }

    pub fn size(&self) -> &str { &self.size }
    pub fn price(&self) -> Money { self.price }
    pub fn discounted_price(&self) -> Money { self.discounted_price }
    /// Stock available for this size.
    pub fn quantity(&self) -> u32 { self.quantity }
}

impl SellerOffer {
    pub fn price_size(&self, size: &str) -> Option<&PriceSize> {
        self.price_sizes.iter().find(|ps| ps.size == size)
    }
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>, images: Vec<String>, offers: Vec<SellerOffer>) -> Self {
        Self { id, name: name.into(), images, offers }
    }

    pub fn id(&self) -> &ProductId { &self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn offers(&self) -> &[SellerOffer] { &self.offers }

    pub fn seller_offer(&self, seller_id: &SellerId) -> Option<&SellerOffer> {
        self.offers.iter().find(|o| &o.seller_id == seller_id)
    }

    pub fn summary(&self) -> ProductSummary {
        ProductSummary { id: self.id.clone(), name: self.name.clone(), image: self.images.first().cloned() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductError { MissingSize, NegativePrice, DiscountAbovePrice { size: String } }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSize => write!(f, "Size label missing"),
            Self::NegativePrice => write!(f, "Price cannot be negative"),
            Self::DiscountAbovePrice { size } => write!(f, "Discounted price exceeds price for size {size}"),
        }
    }
}
