//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types. Identifiers in this
//! domain are opaque strings: the remote cart API assigns its own row ids and
//! catalog SKUs are referenced by whatever the catalog hands out.

/// Macro to define a type-safe string ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `new()`, `as_str()`
/// - `From<String>`, `From<&str>` and `Display` implementations
///
/// # Example
///
/// ```rust
/// # use hearthwood_core::define_id;
/// define_id!(OrderId);
/// define_id!(ShipmentId);
///
/// let order_id = OrderId::new("o-1");
/// let shipment_id = ShipmentId::new("o-1");
///
/// // These are different types, so this won't compile:
/// // let _: OrderId = shipment_id;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID from anything string-like.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the underlying string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

// Row identity inside a cart or wishlist. Server-assigned once authenticated,
// client-assigned (`guest-` prefix) while anonymous.
define_id!(ItemId);
// Catalog SKU reference, opaque to the cart engine.
define_id!(VariantId);

const GUEST_PREFIX: &str = "guest-";
const PENDING_PREFIX: &str = "pending-";

impl ItemId {
    /// Generate a row id for a guest-created row.
    ///
    /// Collision resistant on one device; not compared across devices because
    /// guest rows are discarded at migration.
    #[must_use]
    pub fn generate_guest() -> Self {
        Self(format!("{GUEST_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    /// Generate a provisional id for an optimistic row awaiting server
    /// confirmation. The reconciler replaces it with the server's id.
    #[must_use]
    pub fn generate_pending() -> Self {
        Self(format!("{PENDING_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    /// Whether this id was generated on the client for a guest row.
    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.0.starts_with(GUEST_PREFIX)
    }

    /// Whether this id is a provisional optimistic id.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.0.starts_with(PENDING_PREFIX)
    }
}
