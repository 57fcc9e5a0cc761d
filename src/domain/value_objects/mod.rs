//! Value Objects for the cart domain

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into().trim().to_string();
                if value.is_empty() { return Err(IdError::Empty($field)); }
                if value.len() > 128 { return Err(IdError::TooLong($field)); }
                Ok(Self(value))
            }
            pub fn as_str(&self) -> &str { &self.0 }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
        }
    };
}

string_id!(
    /// Identity of the signed-in user, as supplied by the auth layer.
    UserId, "userId"
);
string_id!(
    /// Catalog identifier of a product.
    ProductId, "productId"
);
string_id!(
    /// Identifier of a seller listing a product.
    SellerId, "sellerId"
);

/// Server-assigned identifier of a cart line item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn generate() -> Self { Self(Uuid::now_v7()) }
}

impl FromStr for ItemId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self).map_err(|_| IdError::Malformed("itemId"))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError { Empty(&'static str), TooLong(&'static str), Malformed(&'static str) }

impl IdError {
    pub fn field(&self) -> &'static str {
        match self { Self::Empty(f) | Self::TooLong(f) | Self::Malformed(f) => f }
    }
}

impl std::error::Error for IdError {}
impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty(field) => write!(f, "{field} is required"),
            Self::TooLong(field) => write!(f, "{field} is too long"),
            Self::Malformed(field) => write!(f, "{field} is not a valid identifier"),
        }
    }
}

/// Money value object. Amounts are never negative, including when read back
/// from storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Result<Self, MoneyError> {
        if amount.is_sign_negative() && !amount.is_zero() { return Err(MoneyError::Negative); }
        Ok(Self(amount))
    }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn add(&self, other: &Money) -> Money { Money(self.0 + other.0) }
    pub fn multiply(&self, qty: u32) -> Money { Money(self.0 * Decimal::from(qty)) }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyError;
    fn try_from(amount: Decimal) -> Result<Self, Self::Error> { Self::new(amount) }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self { money.0 }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum MoneyError { Negative }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Amount cannot be negative") }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_ids_are_trimmed_and_required() {
        assert_eq!(ProductId::new("  P1 ").unwrap().as_str(), "P1");
        assert_eq!(SellerId::new("   ").unwrap_err(), IdError::Empty("sellerId"));
    }
    #[test]
    fn test_item_id_parse() {
        let id = ItemId::generate();
        assert_eq!(id.to_string().parse::<ItemId>().unwrap(), id);
        assert_eq!("not-an-id".parse::<ItemId>().unwrap_err().field(), "itemId");
    }
    #[test]
    fn test_money_arithmetic() {
        let a = Money::new(Decimal::new(100, 0)).unwrap();
        let b = Money::new(Decimal::new(50, 0)).unwrap();
        assert_eq!(a.add(&b).amount(), Decimal::new(150, 0));
        assert_eq!(a.multiply(3).amount(), Decimal::new(300, 0));
        assert_eq!(Money::new(Decimal::new(-1, 0)), Err(MoneyError::Negative));
    }
    #[test]
    fn test_money_rejects_negative_json() {
        let m: Money = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(m.amount(), Decimal::new(1250, 2));
        assert_eq!(serde_json::to_string(&m).unwrap(), "\"12.50\"");
        assert!(serde_json::from_str::<Money>("\"-3\"").is_err());
    }
}
