//! Cart service layer.
//!
//! [`CartService`] is the single entry point transport layers call. It
//! supplies the business timestamp for every mutation, hands the caller's
//! [`OpContext`] to each store operation, and returns store errors
//! unchanged apart from logging them.

pub mod clock;
pub mod service;

pub use cart_store::{
    Cart, CartId, CartStore, ErrorKind, LineItem, NewCart, OpContext, ProductId, Result,
    StoreError, UserId,
};
pub use clock::{Clock, SystemClock};
pub use service::CartService;
