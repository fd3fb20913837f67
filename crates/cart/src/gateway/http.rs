//! HTTP implementation of the cart and wishlist gateways.
//!
//! Uses `reqwest` with JSON bodies. Every request carries the customer's bearer
//! credential from the session oracle; a missing credential fails before any
//! network traffic.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use hearthwood_core::{CartItem, ItemId, NewCartItem, NewWishlistItem, WishlistItem};

use super::wire::{
    AddCartItemRequest, AddWishlistItemRequest, ApiErrorBody, INSUFFICIENT_STOCK_CODE,
    MergeCartLine, MergeCartRequest, MergeWishlistLine, MergeWishlistRequest,
    UpdateCartItemRequest, WishlistResponse,
};
use super::{
    CartGateway, GatewayError, MergeReport, RemoteCart, RemoteWishlistLine, WishlistGateway,
};
use crate::session::SessionOracle;

const CART: &str = "cart";
const WISHLIST: &str = "wishlist";
const ITEMS: &str = "items";
const SYNC: &str = "sync";

/// Client for the remote cart API.
///
/// Cheaply cloneable; implements both [`CartGateway`] and [`WishlistGateway`].
#[derive(Clone)]
pub struct HttpCartGateway {
    inner: Arc<HttpCartGatewayInner>,
}

struct HttpCartGatewayInner {
    client: reqwest::Client,
    base_url: Url,
    session: Arc<dyn SessionOracle>,
}

impl HttpCartGateway {
    /// Create a gateway rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: Url, session: Arc<dyn SessionOracle>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, session)
    }

    /// Create a gateway with a preconfigured `reqwest` client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: Url,
        session: Arc<dyn SessionOracle>,
    ) -> Self {
        Self {
            inner: Arc::new(HttpCartGatewayInner {
                client,
                base_url,
                session,
            }),
        }
    }

    /// Build the URL for a route made of `segments`.
    fn url(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        route_url(&self.inner.base_url, segments)
    }

    /// Send a request and return the response body.
    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<String, GatewayError> {
        let token = self
            .inner
            .session
            .current_credential()
            .ok_or(GatewayError::MissingCredential)?;

        let mut request = self
            .inner
            .client
            .request(method.clone(), url.clone())
            .bearer_auth(token.expose_secret())
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(GatewayError::RateLimited(retry_after));
        }

        let response_text = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                method = %method,
                url = %url,
                status = %status,
                body = %response_text.chars().take(500).collect::<String>(),
                "Cart API returned non-success status"
            );
            return Err(classify_failure(status, &response_text));
        }

        debug!(method = %method, url = %url, status = %status, "Cart API request succeeded");
        Ok(response_text)
    }

    /// Send a request and parse a JSON response.
    async fn send_json<B, T>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<T, GatewayError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let text = self.send(method, url, body).await?;
        serde_json::from_str(&text).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %text.chars().take(500).collect::<String>(),
                "Failed to parse cart API response"
            );
            GatewayError::Parse(e)
        })
    }

    async fn patch_item(
        &self,
        item_id: &ItemId,
        body: &UpdateCartItemRequest<'_>,
    ) -> Result<(), GatewayError> {
        let url = self.url(&[CART, ITEMS, item_id.as_str()])?;
        self.send(Method::PATCH, url, Some(body)).await.map(drop)
    }
}

/// Append `segments` to the base URL's path, percent-encoding each one.
fn route_url(base: &Url, segments: &[&str]) -> Result<Url, GatewayError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| GatewayError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map a non-success response onto the gateway error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> GatewayError {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized(message),
        StatusCode::NOT_FOUND => GatewayError::NotFound(message),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY
            if parsed.code.as_deref() == Some(INSUFFICIENT_STOCK_CODE) =>
        {
            GatewayError::InsufficientStock {
                message,
                available: parsed.available,
            }
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            GatewayError::Unavailable(message)
        }
        _ => GatewayError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl CartGateway for HttpCartGateway {
    #[instrument(skip(self))]
    async fn fetch_cart(&self) -> Result<RemoteCart, GatewayError> {
        let url = self.url(&[CART])?;
        self.send_json::<(), _>(Method::GET, url, None).await
    }

    #[instrument(skip(self, item), fields(variant_id = %item.variant_id))]
    async fn add_item(&self, item: &NewCartItem) -> Result<(), GatewayError> {
        let url = self.url(&[CART, ITEMS])?;
        let body = AddCartItemRequest::from(item);
        self.send(Method::POST, url, Some(&body)).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn update_quantity(&self, item_id: &ItemId, quantity: u32) -> Result<(), GatewayError> {
        self.patch_item(item_id, &UpdateCartItemRequest::Quantity { quantity })
            .await
    }

    #[instrument(skip(self))]
    async fn update_flag(
        &self,
        item_id: &ItemId,
        assembly_required: bool,
    ) -> Result<(), GatewayError> {
        self.patch_item(item_id, &UpdateCartItemRequest::Assembly { assembly_required })
            .await
    }

    #[instrument(skip(self))]
    async fn update_color(
        &self,
        item_id: &ItemId,
        color: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.patch_item(item_id, &UpdateCartItemRequest::Color { color })
            .await
    }

    #[instrument(skip(self))]
    async fn remove_item(&self, item_id: &ItemId) -> Result<(), GatewayError> {
        let url = self.url(&[CART, ITEMS, item_id.as_str()])?;
        self.send::<()>(Method::DELETE, url, None).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn clear_cart(&self) -> Result<(), GatewayError> {
        let url = self.url(&[CART])?;
        self.send::<()>(Method::DELETE, url, None).await.map(drop)
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn merge_batch(&self, items: &[CartItem]) -> Result<MergeReport, GatewayError> {
        let url = self.url(&[CART, SYNC])?;
        let body = MergeCartRequest {
            items: items.iter().map(MergeCartLine::from).collect(),
        };
        self.send_json(Method::POST, url, Some(&body)).await
    }
}

#[async_trait]
impl WishlistGateway for HttpCartGateway {
    #[instrument(skip(self))]
    async fn fetch_wishlist(&self) -> Result<Vec<RemoteWishlistLine>, GatewayError> {
        let url = self.url(&[WISHLIST])?;
        let response: WishlistResponse = self.send_json::<(), _>(Method::GET, url, None).await?;
        Ok(response.items)
    }

    #[instrument(skip(self, item), fields(variant_id = %item.variant_id))]
    async fn add_item(&self, item: &NewWishlistItem) -> Result<(), GatewayError> {
        let url = self.url(&[WISHLIST, ITEMS])?;
        let body = AddWishlistItemRequest::from(item);
        self.send(Method::POST, url, Some(&body)).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn remove_item(&self, item_id: &ItemId) -> Result<(), GatewayError> {
        let url = self.url(&[WISHLIST, ITEMS, item_id.as_str()])?;
        self.send::<()>(Method::DELETE, url, None).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn clear_wishlist(&self) -> Result<(), GatewayError> {
        let url = self.url(&[WISHLIST])?;
        self.send::<()>(Method::DELETE, url, None).await.map(drop)
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn merge_batch(&self, items: &[WishlistItem]) -> Result<MergeReport, GatewayError> {
        let url = self.url(&[WISHLIST, SYNC])?;
        let body = MergeWishlistRequest {
            items: items.iter().map(MergeWishlistLine::from).collect(),
        };
        self.send_json(Method::POST, url, Some(&body)).await
    }
}
