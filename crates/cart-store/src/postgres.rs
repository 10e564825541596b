use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, ProductId, UserId};
use sqlx::{
    PgPool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
};

use crate::{
    Cart, LineItem, NewCart, OpContext, Result, StoreError,
    store::{CartStore, merge_quantity, validate_quantity},
};

const SCHEMA: &str = include_str!("../../../migrations/001_create_carts.sql");

/// PostgreSQL-backed cart store implementation.
///
/// Lost updates on quantity merges are prevented with pessimistic row
/// locking: every mutating transaction first locks the cart row, then the
/// line item (`SELECT ... FOR UPDATE`). Under READ COMMITTED each statement
/// that runs after a lock wait sees the latest committed state, so the
/// read-modify-write in `add_product` always builds on the previous commit.
/// Locks are always taken in the same order (cart, then line item).
///
/// Statements run under [`OpContext::run`] and the `COMMIT` under
/// [`OpContext::commit`], so a cancelled operation is rolled back and an
/// operation reported as successful is committed.
#[derive(Clone)]
pub struct PostgresCartStore {
    pool: PgPool,
}

impl PostgresCartStore {
    /// Creates a new PostgreSQL cart store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the cart tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn decode_quantity(quantity: i64) -> Result<u32> {
        u32::try_from(quantity).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
    }

    fn row_to_line_item(row: &PgRow) -> Result<LineItem> {
        Ok(LineItem {
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: Self::decode_quantity(row.try_get("quantity")?)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Locks the cart row until the transaction ends.
    async fn lock_cart(tx: &mut Transaction<'_, Postgres>, cart_id: CartId) -> Result<()> {
        let locked: Option<i64> =
            sqlx::query_scalar("SELECT cart_id FROM carts WHERE cart_id = $1 FOR UPDATE")
                .bind(cart_id.as_i64())
                .fetch_optional(&mut **tx)
                .await?;

        locked
            .map(|_| ())
            .ok_or(StoreError::CartNotFound(cart_id))
    }

    /// Stamps the cart's update time, which also locks the cart row.
    async fn touch_cart(
        tx: &mut Transaction<'_, Postgres>,
        cart_id: CartId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE carts SET updated_at = GREATEST(created_at, $2) WHERE cart_id = $1",
        )
        .bind(cart_id.as_i64())
        .bind(now)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CartNotFound(cart_id));
        }
        Ok(())
    }

    async fn begin(&self, ctx: &OpContext) -> Result<Transaction<'static, Postgres>> {
        ctx.run(async { Ok(self.pool.begin().await?) }).await
    }

    async fn insert_cart(tx: &mut Transaction<'_, Postgres>, cart: &NewCart) -> Result<Cart> {
        let row = sqlx::query(
            r#"
            INSERT INTO carts (user_id, created_at, updated_at)
            VALUES ($1, $2, $3)
            RETURNING cart_id, created_at, updated_at
            "#,
        )
        .bind(cart.user_id.as_i64())
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(Cart {
            id: CartId::new(row.try_get("cart_id")?),
            user_id: cart.user_id,
            items: Vec::new(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn remove_cart(tx: &mut Transaction<'_, Postgres>, cart_id: CartId) -> Result<()> {
        Self::lock_cart(tx, cart_id).await?;

        sqlx::query("DELETE FROM line_items WHERE cart_id = $1")
            .bind(cart_id.as_i64())
            .execute(&mut **tx)
            .await?;

        sqlx::query("DELETE FROM carts WHERE cart_id = $1")
            .bind(cart_id.as_i64())
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    async fn merge_line_item(
        tx: &mut Transaction<'_, Postgres>,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<LineItem> {
        Self::touch_cart(tx, cart_id, now).await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM line_items WHERE cart_id = $1 AND product_id = $2 FOR UPDATE",
        )
        .bind(cart_id.as_i64())
        .bind(product_id.as_i64())
        .fetch_optional(&mut **tx)
        .await?;

        let row = match existing {
            Some(current) => {
                let merged =
                    merge_quantity(cart_id, product_id, Self::decode_quantity(current)?, quantity)?;

                sqlx::query(
                    r#"
                    UPDATE line_items
                    SET quantity = $3, updated_at = GREATEST(created_at, $4)
                    WHERE cart_id = $1 AND product_id = $2
                    RETURNING product_id, quantity, created_at, updated_at
                    "#,
                )
                .bind(cart_id.as_i64())
                .bind(product_id.as_i64())
                .bind(i64::from(merged))
                .bind(now)
                .fetch_one(&mut **tx)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO line_items (cart_id, product_id, quantity, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $4)
                    RETURNING product_id, quantity, created_at, updated_at
                    "#,
                )
                .bind(cart_id.as_i64())
                .bind(product_id.as_i64())
                .bind(i64::from(quantity))
                .bind(now)
                .fetch_one(&mut **tx)
                .await?
            }
        };

        Self::row_to_line_item(&row)
    }

    async fn remove_line_item(
        tx: &mut Transaction<'_, Postgres>,
        cart_id: CartId,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // One statement: lock the cart, drop the line item, and stamp the
        // cart only when a line item was actually removed.
        sqlx::query(
            r#"
            WITH locked AS (
                SELECT cart_id FROM carts WHERE cart_id = $1 FOR UPDATE
            ), deleted AS (
                DELETE FROM line_items
                WHERE cart_id IN (SELECT cart_id FROM locked) AND product_id = $2
                RETURNING cart_id
            )
            UPDATE carts SET updated_at = GREATEST(created_at, $3)
            WHERE cart_id IN (SELECT cart_id FROM deleted)
            "#,
        )
        .bind(cart_id.as_i64())
        .bind(product_id.as_i64())
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn read_cart(tx: &mut Transaction<'_, Postgres>, cart_id: CartId) -> Result<Cart> {
        // Header and items must come from the same snapshot.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut **tx)
            .await?;

        let header: Option<PgRow> =
            sqlx::query("SELECT user_id, created_at, updated_at FROM carts WHERE cart_id = $1")
                .bind(cart_id.as_i64())
                .fetch_optional(&mut **tx)
                .await?;

        let Some(header) = header else {
            return Err(StoreError::CartNotFound(cart_id));
        };

        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity, created_at, updated_at
            FROM line_items
            WHERE cart_id = $1
            ORDER BY created_at ASC, product_id ASC
            "#,
        )
        .bind(cart_id.as_i64())
        .fetch_all(&mut **tx)
        .await?;

        let items = rows
            .iter()
            .map(Self::row_to_line_item)
            .collect::<Result<Vec<_>>>()?;

        Ok(Cart {
            id: cart_id,
            user_id: UserId::new(header.try_get("user_id")?),
            items,
            created_at: header.try_get("created_at")?,
            updated_at: header.try_get("updated_at")?,
        })
    }

    async fn clear_line_items(
        tx: &mut Transaction<'_, Postgres>,
        cart_id: CartId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        Self::lock_cart(tx, cart_id).await?;

        sqlx::query("DELETE FROM line_items WHERE cart_id = $1")
            .bind(cart_id.as_i64())
            .execute(&mut **tx)
            .await?;

        Self::touch_cart(tx, cart_id, now).await
    }
}

#[async_trait]
impl CartStore for PostgresCartStore {
    async fn create_cart(&self, ctx: &OpContext, cart: NewCart) -> Result<Cart> {
        let mut tx = self.begin(ctx).await?;
        let cart = ctx.run(Self::insert_cart(&mut tx, &cart)).await?;
        ctx.commit(tx.commit()).await?;
        Ok(cart)
    }

    async fn delete_cart(&self, ctx: &OpContext, cart_id: CartId) -> Result<()> {
        let mut tx = self.begin(ctx).await?;
        ctx.run(Self::remove_cart(&mut tx, cart_id)).await?;
        ctx.commit(tx.commit()).await
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

        let mut tx = self.begin(ctx).await?;
        let item = ctx
            .run(Self::merge_line_item(&mut tx, cart_id, product_id, quantity, now))
            .await?;
        ctx.commit(tx.commit()).await?;

        tracing::debug!(%cart_id, %product_id, quantity = item.quantity, "line item merged");
        Ok(item)
    }

    async fn delete_product(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.begin(ctx).await?;
        ctx.run(Self::remove_line_item(&mut tx, cart_id, product_id, now)).await?;
        ctx.commit(tx.commit()).await
    }

    async fn cart_by_id(&self, ctx: &OpContext, cart_id: CartId) -> Result<Cart> {
        let mut tx = self.begin(ctx).await?;
        let cart = ctx.run(Self::read_cart(&mut tx, cart_id)).await?;
        ctx.commit(tx.commit()).await?;
        Ok(cart)
    }

    async fn delete_line_items(
        &self,
        ctx: &OpContext,
        cart_id: CartId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.begin(ctx).await?;
        ctx.run(Self::clear_line_items(&mut tx, cart_id, now)).await?;
        ctx.commit(tx.commit()).await
    }

    async fn carts_by_user(&self, ctx: &OpContext, user_id: UserId) -> Result<Vec<CartId>> {
        let ids: Vec<i64> = ctx
            .run(async {
                Ok(sqlx::query_scalar(
                    "SELECT cart_id FROM carts WHERE user_id = $1 ORDER BY cart_id ASC",
                )
                .bind(user_id.as_i64())
                .fetch_all(&self.pool)
                .await?)
            })
            .await?;

        Ok(ids.into_iter().map(CartId::new).collect())
    }

    async fn ping(&self, ctx: &OpContext) -> Result<()> {
        ctx.run(async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
        .await
    }
}
