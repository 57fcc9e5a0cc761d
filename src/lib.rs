//! Agrimart Cart
//!
//! Multi-seller shopping cart and pricing engine for the Agrimart storefront.
//!
//! ## Features
//! - One cart per user, lines keyed by (product, size, seller)
//! - Quantities capped at the seller's declared stock
//! - Totals always derived from the cart lines
//! - Optimistic concurrency on every cart write
//! - Offline-tolerant client mirror of the last known cart

pub mod adapters;
pub mod client_cache;
pub mod config;
pub mod domain;
pub mod http;
pub mod ports;
pub mod service;

use std::fmt;
use thiserror::Error;

use crate::domain::value_objects::IdError;
use crate::ports::StorageError;
use crate::service::CartView;

pub use crate::service::CartService;

// =============================================================================
// Error Types
// =============================================================================

/// Entity a lookup failed to find.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Product,
    Seller,
    Size,
    Cart,
    Item,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resource::Product => "product",
            Resource::Seller => "seller",
            Resource::Size => "size",
            Resource::Cart => "cart",
            Resource::Item => "item",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone)]
pub enum CartServiceError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{0} not found")]
    NotFound(Resource),

    /// The capped quantity was persisted; `cart` is the state after the write.
    #[error("Only {ceiling} units in stock")]
    StockExceeded { ceiling: u32, cart: Box<CartView> },

    #[error("Storage error: {0}")]
    TransientStorage(String),
}

impl CartServiceError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), reason: reason.into() }
    }

    /// Whether the same request may succeed if sent again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }
}

impl From<StorageError> for CartServiceError {
    fn from(e: StorageError) -> Self {
        Self::TransientStorage(e.to_string())
    }
}

impl From<IdError> for CartServiceError {
    fn from(e: IdError) -> Self {
        Self::validation(e.field(), e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CartServiceError>;
