//! Request and response bodies for the remote cart API.

use serde::{Deserialize, Serialize};

use hearthwood_core::{CartItem, NewCartItem, NewWishlistItem, WishlistItem};

use super::RemoteWishlistLine;

/// `POST /cart/items`
///
/// Prices are not sent; the server prices lines from its own catalog.
#[derive(Debug, Serialize)]
pub struct AddCartItemRequest<'a> {
    pub variant_id: &'a str,
    pub quantity: u32,
    pub assembly_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<&'a str>,
}

impl<'a> From<&'a NewCartItem> for AddCartItemRequest<'a> {
    fn from(item: &'a NewCartItem) -> Self {
        Self {
            variant_id: item.variant_id.as_str(),
            quantity: item.quantity,
            assembly_required: item.assembly_required,
            color: item.color.as_deref(),
            size: item.size.as_deref(),
        }
    }
}

/// `PATCH /cart/items/{id}` bodies. Each update touches exactly one field.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UpdateCartItemRequest<'a> {
    Quantity { quantity: u32 },
    Assembly { assembly_required: bool },
    Color { color: Option<&'a str> },
}

/// `POST /cart/sync`
#[derive(Debug, Serialize)]
pub struct MergeCartRequest<'a> {
    pub items: Vec<MergeCartLine<'a>>,
}

#[derive(Debug, Serialize)]
pub struct MergeCartLine<'a> {
    /// Guest row id, echoed back in the rejection list.
    pub client_id: &'a str,
    pub variant_id: &'a str,
    pub quantity: u32,
    pub assembly_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<&'a str>,
}

impl<'a> From<&'a CartItem> for MergeCartLine<'a> {
    fn from(item: &'a CartItem) -> Self {
        Self {
            client_id: item.id.as_str(),
            variant_id: item.variant_id.as_str(),
            quantity: item.quantity,
            assembly_required: item.assembly_required,
            color: item.color.as_deref(),
            size: item.size.as_deref(),
        }
    }
}

/// `POST /wishlist/items`
#[derive(Debug, Serialize)]
pub struct AddWishlistItemRequest<'a> {
    pub variant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<&'a str>,
}

impl<'a> From<&'a NewWishlistItem> for AddWishlistItemRequest<'a> {
    fn from(item: &'a NewWishlistItem) -> Self {
        Self {
            variant_id: item.variant_id.as_str(),
            color: item.color.as_deref(),
            size: item.size.as_deref(),
        }
    }
}

/// `POST /wishlist/sync`
#[derive(Debug, Serialize)]
pub struct MergeWishlistRequest<'a> {
    pub items: Vec<MergeWishlistLine<'a>>,
}

#[derive(Debug, Serialize)]
pub struct MergeWishlistLine<'a> {
    pub client_id: &'a str,
    pub variant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'a str>,
}

impl<'a> From<&'a WishlistItem> for MergeWishlistLine<'a> {
    fn from(item: &'a WishlistItem) -> Self {
        Self {
            client_id: item.id.as_str(),
            variant_id: item.variant_id.as_str(),
            color: item.color.as_deref(),
        }
    }
}

/// `GET /wishlist`
#[derive(Debug, Deserialize)]
pub struct WishlistResponse {
    #[serde(default)]
    pub items: Vec<RemoteWishlistLine>,
}

/// Error body returned with non-success statuses.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub available: Option<u32>,
}

/// Error code the API uses for inventory rejections.
pub const INSUFFICIENT_STOCK_CODE: &str = "insufficient_stock";

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn test_update_bodies() {
        let body = serde_json::to_value(UpdateCartItemRequest::Quantity { quantity: 3 }).unwrap();
        assert_eq!(body, serde_json::json!({ "quantity": 3 }));

        let body = serde_json::to_value(UpdateCartItemRequest::Assembly {
            assembly_required: true,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "assembly_required": true }));

        let body = serde_json::to_value(UpdateCartItemRequest::Color { color: None }).unwrap();
        assert_eq!(body, serde_json::json!({ "color": null }));
    }

    #[test]
    fn test_add_body_skips_missing_attributes() {
        let item = NewCartItem::new("sku-bed", 1, Decimal::from(900));
        let body = serde_json::to_value(AddCartItemRequest::from(&item)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "variant_id": "sku-bed",
                "quantity": 1,
                "assembly_required": false,
            })
        );
    }
}
