//! Engine wiring for a single CLI invocation.

use std::sync::Arc;

use async_trait::async_trait;
use hearthwood_cart::gateway::{
    HttpCartGateway, MergeReport, RemoteCart, RemoteWishlistLine,
};
use hearthwood_cart::guest::FileBackend;
use hearthwood_cart::{
    CartEngine, CartGateway, CartSyncConfig, GatewayError, StaticSession, WishlistEngine,
    WishlistGateway,
};
use hearthwood_core::{CartItem, ItemId, NewCartItem, NewWishlistItem, WishlistItem};
use secrecy::SecretString;

use crate::commands::CliError;

/// Engines sharing one session and one guest directory.
pub struct Context {
    pub session: Arc<StaticSession>,
    pub cart: CartEngine,
    pub wishlist: WishlistEngine,
}

impl Context {
    /// Build engines for `token`, or guest-only engines when there is none.
    ///
    /// # Errors
    ///
    /// Returns `CliError::Config` if a token is given without `CART_API_BASE_URL`.
    pub fn build(config: &CartSyncConfig, token: Option<SecretString>) -> Result<Self, CliError> {
        let remote = token.is_some();
        let session = Arc::new(token.map_or_else(StaticSession::anonymous, StaticSession::authenticated));
        Self::wire(config, session, remote)
    }

    /// Build engines that start anonymous but can reach the remote API.
    ///
    /// # Errors
    ///
    /// Returns `CliError::Config` if `CART_API_BASE_URL` is unset.
    pub fn for_login(config: &CartSyncConfig) -> Result<Self, CliError> {
        Self::wire(config, Arc::new(StaticSession::anonymous()), true)
    }

    fn wire(
        config: &CartSyncConfig,
        session: Arc<StaticSession>,
        remote: bool,
    ) -> Result<Self, CliError> {
        let backend = Arc::new(FileBackend::new(&config.guest_dir));

        let (cart_gateway, wishlist_gateway) = if remote {
            let base_url = config.require_api_base_url()?.clone();
            let http = Arc::new(HttpCartGateway::new(base_url, session.clone()));
            let cart: Arc<dyn CartGateway> = http.clone();
            let wishlist: Arc<dyn WishlistGateway> = http;
            (cart, wishlist)
        } else {
            let offline = Arc::new(OfflineGateway);
            let cart: Arc<dyn CartGateway> = offline.clone();
            let wishlist: Arc<dyn WishlistGateway> = offline;
            (cart, wishlist)
        };

        Ok(Self {
            cart: CartEngine::new(session.clone(), cart_gateway, backend.clone(), config),
            wishlist: WishlistEngine::new(session.clone(), wishlist_gateway, backend, config),
            session,
        })
    }
}

/// Gateway for guest-only runs; every call fails.
struct OfflineGateway;

fn offline() -> GatewayError {
    GatewayError::InvalidUrl("CART_API_BASE_URL is not configured".to_string())
}

#[async_trait]
impl CartGateway for OfflineGateway {
    async fn fetch_cart(&self) -> Result<RemoteCart, GatewayError> {
        Err(offline())
    }

    async fn add_item(&self, _item: &NewCartItem) -> Result<(), GatewayError> {
        Err(offline())
    }

    async fn update_quantity(&self, _item_id: &ItemId, _quantity: u32) -> Result<(), GatewayError> {
        Err(offline())
    }

    async fn update_flag(&self, _item_id: &ItemId, _assembly_required: bool) -> Result<(), GatewayError> {
        Err(offline())
    }

    async fn update_color(&self, _item_id: &ItemId, _color: Option<&str>) -> Result<(), GatewayError> {
        Err(offline())
    }

    async fn remove_item(&self, _item_id: &ItemId) -> Result<(), GatewayError> {
        Err(offline())
    }

    async fn clear_cart(&self) -> Result<(), GatewayError> {
        Err(offline())
    }

    async fn merge_batch(&self, _items: &[CartItem]) -> Result<MergeReport, GatewayError> {
        Err(offline())
    }
}

#[async_trait]
impl WishlistGateway for OfflineGateway {
    async fn fetch_wishlist(&self) -> Result<Vec<RemoteWishlistLine>, GatewayError> {
        Err(offline())
    }

    async fn add_item(&self, _item: &NewWishlistItem) -> Result<(), GatewayError> {
        Err(offline())
    }

    async fn remove_item(&self, _item_id: &ItemId) -> Result<(), GatewayError> {
        Err(offline())
    }

    async fn clear_wishlist(&self) -> Result<(), GatewayError> {
        Err(offline())
    }

    async fn merge_batch(&self, _items: &[WishlistItem]) -> Result<MergeReport, GatewayError> {
        Err(offline())
    }
}
