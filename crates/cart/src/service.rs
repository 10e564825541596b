//! Cart service providing the API transport layers call.

use cart_store::{
    Cart, CartId, CartStore, ErrorKind, LineItem, NewCart, OpContext, ProductId, Result, UserId,
};

use crate::clock::{Clock, SystemClock};

/// Service for managing carts.
///
/// Every method hands the caller's [`OpContext`] to the store, supplying
/// `clock.now()` where the store needs a timestamp. Errors are
/// logged and counted, then returned exactly as the store produced them.
pub struct CartService<S: CartStore, C: Clock = SystemClock> {
    store: S,
    clock: C,
}

impl<S: CartStore> CartService<S> {
    /// Creates a new cart service backed by the wall clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: CartStore, C: Clock> CartService<S, C> {
    /// Creates a new cart service with a custom clock.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adds a quantity of a product to a cart, merging with any quantity
    /// already there. Returns the resulting line item.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn add_product(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<LineItem> {
        let now = self.clock.now();
        let result = self
            .store
            .add_product(ctx, cart_id, product_id, quantity, now)
            .await;
        observe("add_product", &result);
        result
    }

    /// Removes a product from a cart.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn delete_product(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<()> {
        let now = self.clock.now();
        let result = self
            .store
            .delete_product(ctx, cart_id, product_id, now)
            .await;
        observe("delete_product", &result);
        result
    }

    /// Returns the cart with the given id.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn get(&self, ctx: &OpContext, cart_id: CartId) -> Result<Cart> {
        let result = self.store.cart_by_id(ctx, cart_id).await;
        match &result {
            // A lookup miss is an ordinary answer, not a failure.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(%cart_id, "cart not found");
                record("get", Some(ErrorKind::NotFound));
            }
            _ => observe("get", &result),
        }
        result
    }

    /// Creates an empty cart for a user.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn create(&self, ctx: &OpContext, user_id: UserId) -> Result<Cart> {
        let cart = NewCart::new(user_id, self.clock.now());
        let result = self.store.create_cart(ctx, cart).await;
        if let Ok(cart) = &result {
            tracing::info!(cart_id = %cart.id, "cart created");
        }
        observe("create", &result);
        result
    }

    /// Deletes a cart and all of its line items.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn delete(&self, ctx: &OpContext, cart_id: CartId) -> Result<()> {
        let result = self.store.delete_cart(ctx, cart_id).await;
        observe("delete", &result);
        result
    }

    /// Removes every line item from a cart, keeping the cart itself.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn empty(&self, ctx: &OpContext, cart_id: CartId) -> Result<()> {
        let now = self.clock.now();
        let result = self.store.delete_line_items(ctx, cart_id, now).await;
        observe("empty", &result);
        result
    }

    /// Lists the ids of all carts owned by a user.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn carts_for_user(&self, ctx: &OpContext, user_id: UserId) -> Result<Vec<CartId>> {
        let result = self.store.carts_by_user(ctx, user_id).await;
        observe("carts_for_user", &result);
        result
    }

    /// Checks that the store can serve requests.
    pub async fn ping(&self, ctx: &OpContext) -> Result<()> {
        let result = self.store.ping(ctx).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "cart store unavailable");
        }
        result
    }
}

/// Logs a failed operation at a level matching its kind and counts it.
fn observe<T>(operation: &'static str, result: &Result<T>) {
    let Err(err) = result else {
        record(operation, None);
        return;
    };

    match err.kind() {
        ErrorKind::Internal => tracing::error!(operation, error = %err, "cart operation failed"),
        ErrorKind::NotFound | ErrorKind::Validation | ErrorKind::Cancelled => {
            tracing::warn!(operation, error = %err, "cart operation rejected")
        }
    }
    record(operation, Some(err.kind()));
}

fn record(operation: &'static str, failure: Option<ErrorKind>) {
    let outcome = failure.map_or("ok", |kind| kind.as_str());
    metrics::counter!("cart_operations_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use cart_store::{InMemoryCartStore, StoreError};
    use chrono::{DateTime, Duration, Utc};

    use super::*;
    use crate::clock::ManualClock;

    fn service() -> (CartService<InMemoryCartStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let service = CartService::with_clock(InMemoryCartStore::new(), clock.clone());
        (service, clock)
    }

    /// A store where every operation fails with a database error.
    struct BrokenStore;

    #[async_trait]
    impl CartStore for BrokenStore {
        async fn create_cart(&self, _ctx: &OpContext, _cart: NewCart) -> Result<Cart> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn delete_cart(&self, _ctx: &OpContext, _cart_id: CartId) -> Result<()> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn add_product(
            &self,
            _ctx: &OpContext,
            _cart_id: CartId,
            _product_id: ProductId,
            _quantity: u32,
            _now: DateTime<Utc>,
        ) -> Result<LineItem> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn delete_product(
            &self,
            _ctx: &OpContext,
            _cart_id: CartId,
            _product_id: ProductId,
            _now: DateTime<Utc>,
        ) -> Result<()> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn cart_by_id(&self, _ctx: &OpContext, _cart_id: CartId) -> Result<Cart> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn delete_line_items(
            &self,
            _ctx: &OpContext,
            _cart_id: CartId,
            _now: DateTime<Utc>,
        ) -> Result<()> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn carts_by_user(&self, _ctx: &OpContext, _user_id: UserId) -> Result<Vec<CartId>> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn ping(&self, _ctx: &OpContext) -> Result<()> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn create_stamps_both_timestamps_with_clock() {
        let (service, clock) = service();
        let ctx = OpContext::background();

        let cart = service.create(&ctx, UserId::new(13)).await.unwrap();

        assert_eq!(cart.user_id, UserId::new(13));
        assert!(cart.is_empty());
        assert_eq!(cart.created_at, clock.now());
        assert_eq!(cart.updated_at, cart.created_at);
    }

    #[tokio::test]
    async fn add_product_uses_clock_for_timestamps() {
        let (service, clock) = service();
        let ctx = OpContext::background();
        let cart = service.create(&ctx, UserId::new(1)).await.unwrap();

        clock.advance(Duration::seconds(10));
        let item = service
            .add_product(&ctx, cart.id, ProductId::new(2), 3)
            .await
            .unwrap();

        assert_eq!(item.created_at, clock.now());
        let cart = service.get(&ctx, cart.id).await.unwrap();
        assert_eq!(cart.updated_at, clock.now());
        assert!(cart.updated_at > cart.created_at);
    }

    #[tokio::test]
    async fn zero_quantity_is_a_validation_error() {
        let (service, _) = service();
        let ctx = OpContext::background();
        let cart = service.create(&ctx, UserId::new(1)).await.unwrap();

        let err = service
            .add_product(&ctx, cart.id, ProductId::new(2), 0)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(service.get(&ctx, cart.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_advances_update_time() {
        let (service, clock) = service();
        let ctx = OpContext::background();
        let cart = service.create(&ctx, UserId::new(1)).await.unwrap();

        service
            .add_product(&ctx, cart.id, ProductId::new(2), 1)
            .await
            .unwrap();
        service
            .add_product(&ctx, cart.id, ProductId::new(3), 2)
            .await
            .unwrap();
        clock.advance(Duration::seconds(1));
        service.empty(&ctx, cart.id).await.unwrap();

        let cart = service.get(&ctx, cart.id).await.unwrap();
        assert!(cart.is_empty());
        assert!(cart.updated_at > cart.created_at);
    }

    #[tokio::test]
    async fn missing_cart_errors_are_not_found() {
        let (service, _) = service();
        let ctx = OpContext::background();
        let missing = CartId::new(4444444);

        assert!(service.get(&ctx, missing).await.unwrap_err().is_not_found());
        assert!(service.delete(&ctx, missing).await.unwrap_err().is_not_found());
        assert!(service.empty(&ctx, missing).await.unwrap_err().is_not_found());
        service
            .delete_product(&ctx, missing, ProductId::new(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn store_errors_pass_through_unchanged() {
        let service = CartService::new(BrokenStore);
        let ctx = OpContext::background();
        let id = CartId::new(1);

        let errors = vec![
            service.create(&ctx, UserId::new(1)).await.map(|_| ()),
            service.get(&ctx, id).await.map(|_| ()),
            service
                .add_product(&ctx, id, ProductId::new(1), 1)
                .await
                .map(|_| ()),
            service.delete_product(&ctx, id, ProductId::new(1)).await,
            service.delete(&ctx, id).await,
            service.empty(&ctx, id).await,
            service.carts_for_user(&ctx, UserId::new(1)).await.map(|_| ()),
            service.ping(&ctx).await,
        ];

        for result in errors {
            let err = result.unwrap_err();
            assert!(matches!(
                err,
                StoreError::Database(sqlx::Error::PoolTimedOut)
            ));
            assert_eq!(err.kind(), ErrorKind::Internal);
        }
    }

    #[tokio::test]
    async fn cancelled_context_skips_the_store() {
        let (service, _) = service();
        let ctx = OpContext::background();
        ctx.cancel();

        let err = service.create(&ctx, UserId::new(1)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(service.store().cart_count().await, 0);
    }

    #[tokio::test]
    async fn external_token_cancels_service_calls() {
        let (service, _) = service();
        let token = tokio_util::sync::CancellationToken::new();
        let ctx = OpContext::with_token(token.clone());

        let cart = service.create(&ctx, UserId::new(1)).await.unwrap();
        service.ping(&ctx).await.unwrap();

        token.cancel();
        let err = service
            .add_product(&ctx, cart.id, ProductId::new(1), 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let fresh = OpContext::background();
        assert!(service.get(&fresh, cart.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn carts_for_user_lists_created_carts() {
        let (service, _) = service();
        let ctx = OpContext::background();

        let a = service.create(&ctx, UserId::new(5)).await.unwrap();
        let b = service.create(&ctx, UserId::new(5)).await.unwrap();

        let ids = service.carts_for_user(&ctx, UserId::new(5)).await.unwrap();
        assert_eq!(ids, vec![a.id, b.id]);
    }
}
