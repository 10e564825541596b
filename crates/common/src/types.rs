use serde::{Deserialize, Serialize};

/// Declares a numeric identifier newtype backed by an `i64`.
///
/// All identifiers in this system are assigned by storage or by upstream
/// services as signed 64-bit integers, which is also the native width of a
/// PostgreSQL `BIGINT`.
macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw identifier value.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw identifier value.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

numeric_id!(
    /// Identifier of a cart. Always assigned by storage at creation time.
    CartId
);

numeric_id!(
    /// Identifier of the user owning a cart.
    UserId
);

numeric_id!(
    /// Identifier of a product (SKU) placed in a cart.
    ProductId
);
