use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, ProductId, UserId};

use crate::{Cart, LineItem, NewCart, OpContext, Result, StoreError};

/// Core trait for cart storage implementations.
///
/// Every multi-statement operation runs inside a single transaction that is
/// committed only on the success path. Each operation honours its
/// [`OpContext`]: once the context is done before the commit, the operation
/// fails with `Cancelled` and leaves nothing behind. All implementations
/// must be thread-safe (Send + Sync).
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Persists an item-less cart and returns it with its assigned id.
    ///
    /// Users may own any number of carts; this never fails on a duplicate.
    async fn create_cart(&self, ctx: &OpContext, cart: NewCart) -> Result<Cart>;

    /// Deletes a cart and every line item it owns, atomically.
    ///
    /// Fails with `CartNotFound` if the cart does not exist. A cart without
    /// line items is deleted normally.
    async fn delete_cart(&self, ctx: &OpContext, cart_id: CartId) -> Result<()>;

    /// Merges `quantity` of a product into a cart.
    ///
    /// Inserts a new line item when the product is not in the cart yet,
    /// otherwise adds to the existing quantity. Concurrent calls for the same
    /// (cart, product) pair never lose an update. Returns the merged line item.
    ///
    /// Fails with `InvalidQuantity` for a zero quantity (before any work is
    /// done), `QuantityOverflow` if the sum does not fit a `u32`, and
    /// `CartNotFound` if the cart does not exist.
    async fn add_product(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<LineItem>;

    /// Removes the line item for a product.
    ///
    /// Removing a product that is not in the cart is not an error.
    async fn delete_product(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Loads a cart with all its line items from one consistent snapshot.
    ///
    /// Fails with `CartNotFound` if the cart does not exist.
    async fn cart_by_id(&self, ctx: &OpContext, cart_id: CartId) -> Result<Cart>;

    /// Removes every line item of a cart and stamps its update time.
    ///
    /// An already empty cart is fine; a missing cart fails with `CartNotFound`.
    async fn delete_line_items(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Returns the ids of all carts owned by a user, ascending.
    async fn carts_by_user(&self, ctx: &OpContext, user_id: UserId) -> Result<Vec<CartId>>;

    /// Checks that the backend can serve requests.
    async fn ping(&self, ctx: &OpContext) -> Result<()>;
}

/// Extension trait providing convenience methods for cart stores.
#[async_trait]
pub trait CartStoreExt: CartStore {
    /// Checks if a cart exists.
    async fn cart_exists(&self, ctx: &OpContext, cart_id: CartId) -> Result<bool> {
        match self.cart_by_id(ctx, cart_id).await {
            Ok(_) => Ok(true),
            Err(StoreError::CartNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns the stored quantity of a product, zero when absent.
    async fn quantity_of(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<u32> {
        Ok(self.cart_by_id(ctx, cart_id).await?.quantity_of(product_id))
    }
}

// Blanket implementation for all CartStore implementations
impl<T: CartStore + ?Sized> CartStoreExt for T {}

/// Rejects quantities that can never be stored.
pub fn validate_quantity(product_id: ProductId, quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(StoreError::InvalidQuantity { product_id });
    }
    Ok(())
}

/// Adds `quantity` to an existing line item quantity.
pub fn merge_quantity(
    cart_id: CartId,
    product_id: ProductId,
    existing: u32,
    quantity: u32,
) -> Result<u32> {
    existing
        .checked_add(quantity)
        .ok_or(StoreError::QuantityOverflow {
            cart_id,
            product_id,
        })
}

/// The update time to stamp on a row created at `created_at`.
///
/// Keeps `updated_at >= created_at` even if the caller's clock steps back.
pub fn stamp(created_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    created_at.max(now)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn zero_quantity_is_rejected() {
        let err = validate_quantity(ProductId::new(5), 0).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidQuantity { product_id } if product_id == ProductId::new(5)
        ));
        assert!(validate_quantity(ProductId::new(5), 1).is_ok());
    }

    #[test]
    fn merge_accumulates() {
        let merged = merge_quantity(CartId::new(1), ProductId::new(2), 1, 5).unwrap();
        assert_eq!(merged, 6);
    }

    #[test]
    fn merge_overflow_is_reported() {
        let err = merge_quantity(CartId::new(1), ProductId::new(2), u32::MAX, 1).unwrap_err();
        assert!(matches!(err, StoreError::QuantityOverflow { .. }));
    }

    #[test]
    fn stamp_never_precedes_creation() {
        let created = Utc::now();
        assert_eq!(stamp(created, created - Duration::seconds(5)), created);

        let later = created + Duration::seconds(5);
        assert_eq!(stamp(created, later), later);
    }
}
