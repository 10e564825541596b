//! Types shared by every crate of the cart service.

pub mod kind;
pub mod types;

pub use kind::ErrorKind;
pub use types::{CartId, ProductId, UserId};
