//! Transactional storage engine for carts and their line items.
//!
//! [`CartStore`] is the persistence seam. [`PostgresCartStore`] is the
//! production backend; [`InMemoryCartStore`] provides the same semantics for
//! tests and local runs.

pub mod context;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{CartId, ErrorKind, ProductId, UserId};
pub use context::OpContext;
pub use error::{Result, StoreError};
pub use memory::InMemoryCartStore;
pub use model::{Cart, LineItem, NewCart};
pub use postgres::PostgresCartStore;
pub use store::{CartStore, CartStoreExt};
