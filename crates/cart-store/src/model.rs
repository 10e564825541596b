use chrono::{DateTime, Utc};
use common::{CartId, ProductId, UserId};
use serde::{Deserialize, Serialize};

/// A single product and its quantity inside a cart.
///
/// A stored line item always has a quantity greater than zero; a product
/// with no quantity is represented by the absence of its line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LineItem {
    /// Creates a line item for a product added for the first time.
    pub fn new(product_id: ProductId, quantity: u32, now: DateTime<Utc>) -> Self {
        Self {
            product_id,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A user's cart together with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Returns the line item for a product, if the cart holds one.
    pub fn item(&self, product_id: ProductId) -> Option<&LineItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    /// Returns the quantity of a product, zero when it is not in the cart.
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.item(product_id).map_or(0, |item| item.quantity)
    }

    /// Returns true if the cart holds no line items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of all quantities in the cart.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }
}

/// The zero-state of a cart, before storage has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCart {
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewCart {
    /// Creates an empty cart for a user; both timestamps are set to `now`.
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attaches the storage-assigned id, producing an item-less cart.
    pub fn into_cart(self, id: CartId) -> Cart {
        Cart {
            id,
            user_id: self.user_id,
            items: Vec::new(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
