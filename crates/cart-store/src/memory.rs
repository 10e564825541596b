use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, ProductId, UserId};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    Cart, LineItem, NewCart, OpContext, Result, StoreError,
    store::{CartStore, merge_quantity, stamp, validate_quantity},
};

#[derive(Default)]
struct State {
    last_id: i64,
    carts: HashMap<CartId, Cart>,
}

impl State {
    fn cart_mut(&mut self, cart_id: CartId) -> Result<&mut Cart> {
        self.carts
            .get_mut(&cart_id)
            .ok_or(StoreError::CartNotFound(cart_id))
    }
}

/// In-memory cart store implementation for testing.
///
/// Waiting for the state lock is the only point where an operation can be
/// cancelled. Once the lock is held the operation runs to completion without
/// yielding, which makes it atomic in the same way a committed transaction
/// is in the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryCartStore {
    /// Creates a new empty in-memory cart store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of carts stored.
    pub async fn cart_count(&self) -> usize {
        self.state.read().await.carts.len()
    }

    /// Returns the total number of line items across all carts.
    pub async fn line_item_count(&self) -> usize {
        self.state
            .read()
            .await
            .carts
            .values()
            .map(|cart| cart.items.len())
            .sum()
    }

    async fn read(&self, ctx: &OpContext) -> Result<RwLockReadGuard<'_, State>> {
        ctx.run(async { Ok(self.state.read().await) }).await
    }

    async fn write(&self, ctx: &OpContext) -> Result<RwLockWriteGuard<'_, State>> {
        ctx.run(async { Ok(self.state.write().await) }).await
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn create_cart(&self, ctx: &OpContext, cart: NewCart) -> Result<Cart> {
        let mut state = self.write(ctx).await?;

        state.last_id += 1;
        let cart = cart.into_cart(CartId::new(state.last_id));
        state.carts.insert(cart.id, cart.clone());

        Ok(cart)
    }

    async fn delete_cart(&self, ctx: &OpContext, cart_id: CartId) -> Result<()> {
        let mut state = self.write(ctx).await?;
        state
            .carts
            .remove(&cart_id)
            .map(|_| ())
            .ok_or(StoreError::CartNotFound(cart_id))
    }

    async fn add_product(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<LineItem> {
        validate_quantity(product_id, quantity)?;

        let mut state = self.write(ctx).await?;
        let cart = state.cart_mut(cart_id)?;

        let item = match cart
            .items
            .iter_mut()
            .find(|item| item.product_id == product_id)
        {
            Some(item) => {
                // Compute before mutating so an overflow leaves the cart untouched.
                item.quantity = merge_quantity(cart_id, product_id, item.quantity, quantity)?;
                item.updated_at = stamp(item.created_at, now);
                item.clone()
            }
            None => {
                let item = LineItem::new(product_id, quantity, now);
                cart.items.push(item.clone());
                item
            }
        };
        cart.updated_at = stamp(cart.created_at, now);

        Ok(item)
    }

    async fn delete_product(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.write(ctx).await?;

        if let Some(cart) = state.carts.get_mut(&cart_id) {
            let before = cart.items.len();
            cart.items.retain(|item| item.product_id != product_id);
            if cart.items.len() != before {
                cart.updated_at = stamp(cart.created_at, now);
            }
        }

        Ok(())
    }

    async fn cart_by_id(&self, ctx: &OpContext, cart_id: CartId) -> Result<Cart> {
        let state = self.read(ctx).await?;
        state
            .carts
            .get(&cart_id)
            .cloned()
            .ok_or(StoreError::CartNotFound(cart_id))
    }

    async fn delete_line_items(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.write(ctx).await?;
        let cart = state.cart_mut(cart_id)?;

        cart.items.clear();
        cart.updated_at = stamp(cart.created_at, now);

        Ok(())
    }

    async fn carts_by_user(&self, ctx: &OpContext, user_id: UserId) -> Result<Vec<CartId>> {
        let state = self.read(ctx).await?;
        let mut ids: Vec<_> = state
            .carts
            .values()
            .filter(|cart| cart.user_id == user_id)
            .map(|cart| cart.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn ping(&self, ctx: &OpContext) -> Result<()> {
        self.read(ctx).await.map(|_| ())
    }
}
