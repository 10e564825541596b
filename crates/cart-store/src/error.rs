use common::{CartId, ErrorKind, ProductId};
use thiserror::Error;

/// Errors that can occur when interacting with the cart store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The cart does not exist.
    #[error("Cart not found: {0}")]
    CartNotFound(CartId),

    /// A product was added with a quantity of zero.
    #[error("Invalid quantity for product {product_id}: quantity must be greater than zero")]
    InvalidQuantity { product_id: ProductId },

    /// Merging the quantity would exceed the largest storable quantity.
    #[error("Quantity overflow for product {product_id} in cart {cart_id}")]
    QuantityOverflow {
        cart_id: CartId,
        product_id: ProductId,
    },

    /// The caller cancelled the operation or its deadline passed.
    /// Nothing was committed.
    #[error("Operation cancelled before completion")]
    Cancelled,

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Classifies the error for callers that only care about its category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::CartNotFound(_) => ErrorKind::NotFound,
            StoreError::InvalidQuantity { .. } | StoreError::QuantityOverflow { .. } => {
                ErrorKind::Validation
            }
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::Database(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the error means the cart does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type for cart store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
