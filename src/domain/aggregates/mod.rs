//! Aggregates module
pub mod product;
pub mod cart;

pub use product::{PriceSize, Product, ProductError, ProductSummary, SellerOffer};
pub use cart::{Cart, CartError, CartLineItem, LineKey};
