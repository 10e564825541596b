//! Cart and line item endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use cart::{Cart, CartId, CartService, CartStore, LineItem, OpContext, ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: CartStore> {
    pub carts: CartService<S>,
    /// Parent of every request context; cancelling it aborts in-flight
    /// cart operations.
    pub root: OpContext,
    pub request_timeout: Duration,
}

impl<S: CartStore> AppState<S> {
    /// Returns a request context bounded by the request timeout.
    pub fn context(&self) -> OpContext {
        self.root.child().with_timeout(self.request_timeout)
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateCartRequest {
    pub user_id: i64,
}

#[derive(Deserialize)]
pub struct AddProductRequest {
    pub product_id: i64,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub id: i64,
    pub user_id: i64,
    pub items: Vec<LineItemResponse>,
    pub total_quantity: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub product_id: i64,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct UserCartsResponse {
    pub user_id: i64,
    pub cart_ids: Vec<i64>,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            id: cart.id.as_i64(),
            user_id: cart.user_id.as_i64(),
            total_quantity: cart.total_quantity(),
            created_at: cart.created_at,
            updated_at: cart.updated_at,
            items: cart.items.into_iter().map(LineItemResponse::from).collect(),
        }
    }
}

impl From<LineItem> for LineItemResponse {
    fn from(item: LineItem) -> Self {
        Self {
            product_id: item.product_id.as_i64(),
            quantity: item.quantity,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

// -- Handlers --

/// POST /carts — creates an empty cart for a user.
#[tracing::instrument(skip(state, payload))]
pub async fn create<S: CartStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<CreateCartRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CartResponse>), ApiError> {
    let Json(req) = payload?;
    let cart = state
        .carts
        .create(&state.context(), UserId::new(req.user_id))
        .await?;

    Ok((StatusCode::CREATED, Json(cart.into())))
}

/// GET /carts/{id} — returns a cart with its line items.
#[tracing::instrument(skip(state))]
pub async fn get<S: CartStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let cart_id: CartId = parse_id(&id)?;
    let cart = state.carts.get(&state.context(), cart_id).await?;

    Ok(Json(cart.into()))
}

/// DELETE /carts/{id} — deletes a cart and its line items.
#[tracing::instrument(skip(state))]
pub async fn delete<S: CartStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let cart_id: CartId = parse_id(&id)?;
    state.carts.delete(&state.context(), cart_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /carts/{id}/items — adds a product, merging with any existing quantity.
#[tracing::instrument(skip(state, payload))]
pub async fn add_product<S: CartStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    payload: Result<Json<AddProductRequest>, JsonRejection>,
) -> Result<Json<LineItemResponse>, ApiError> {
    let cart_id: CartId = parse_id(&id)?;
    let Json(req) = payload?;
    if req.quantity == 0 {
        return Err(ApiError::BadRequest(
            "failed to add the product: wrong quantity".to_string(),
        ));
    }

    let item = state
        .carts
        .add_product(
            &state.context(),
            cart_id,
            ProductId::new(req.product_id),
            req.quantity,
        )
        .await?;

    Ok(Json(item.into()))
}

/// DELETE /carts/{id}/items/{product_id} — removes one product from a cart.
#[tracing::instrument(skip(state))]
pub async fn delete_product<S: CartStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, product_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let cart_id: CartId = parse_id(&id)?;
    let product_id: ProductId = parse_id(&product_id)?;
    state
        .carts
        .delete_product(&state.context(), cart_id, product_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /carts/{id}/items — removes every line item, keeping the cart.
#[tracing::instrument(skip(state))]
pub async fn empty<S: CartStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let cart_id: CartId = parse_id(&id)?;
    state.carts.empty(&state.context(), cart_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/{id}/carts — lists the carts owned by a user.
#[tracing::instrument(skip(state))]
pub async fn user_carts<S: CartStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<UserCartsResponse>, ApiError> {
    let user_id: UserId = parse_id(&id)?;
    let ids = state.carts.carts_for_user(&state.context(), user_id).await?;

    Ok(Json(UserCartsResponse {
        user_id: user_id.as_i64(),
        cart_ids: ids.into_iter().map(i64::from).collect(),
    }))
}

fn parse_id<T: From<i64>>(id: &str) -> Result<T, ApiError> {
    let value = id
        .parse::<i64>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(T::from(value))
}
