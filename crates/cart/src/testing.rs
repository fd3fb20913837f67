//! In-memory collaborators for tests.
//!
//! Available under `cfg(test)` and with the `testing` feature. The gateways
//! simulate a server of record: they assign line ids, merge repeated adds, and
//! can be told to fail, reject rows, or stall to widen race windows.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;

use hearthwood_core::{
    CartItem, Discount, ItemId, NewCartItem, NewWishlistItem, VariantId, WishlistItem,
};

use crate::clock::Clock;
use crate::gateway::{
    CartGateway, GatewayError, MergeReport, RejectedLine, RemoteCart, RemoteCartLine,
    RemoteWishlistLine, WishlistGateway,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Clock
// =============================================================================

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub const fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// A clock stopped at the Unix epoch.
    #[must_use]
    pub const fn epoch() -> Self {
        Self::new(DateTime::UNIX_EPOCH)
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// =============================================================================
// Failure Injection
// =============================================================================

/// Gateway operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    FetchCart,
    FetchWishlist,
    AddItem,
    UpdateQuantity,
    UpdateFlag,
    UpdateColor,
    RemoveItem,
    ClearCart,
    ClearWishlist,
    MergeBatch,
}

/// A failure an in-memory gateway returns until recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Unavailable,
    Unauthorized,
    OutOfStock { available: Option<u32> },
    RateLimited(u64),
}

impl Failure {
    fn to_error(&self) -> GatewayError {
        match self {
            Self::Unavailable => GatewayError::Unavailable("simulated outage".to_string()),
            Self::Unauthorized => GatewayError::Unauthorized("simulated expired token".to_string()),
            Self::OutOfStock { available } => GatewayError::InsufficientStock {
                message: "simulated stock shortage".to_string(),
                available: *available,
            },
            Self::RateLimited(secs) => GatewayError::RateLimited(*secs),
        }
    }
}

/// Call accounting and fault injection shared by both gateways.
#[derive(Debug, Default)]
struct Harness {
    failures: Mutex<HashMap<GatewayOp, Failure>>,
    calls: Mutex<HashMap<GatewayOp, usize>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Harness {
    /// Record a call, wait out the latency, then apply any injected failure.
    async fn enter(&self, op: GatewayOp) -> Result<InFlight<'_>, GatewayError> {
        *lock(&self.calls).entry(op).or_default() += 1;
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = lock(&self.failures).get(&op).cloned();
        match failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(guard),
        }
    }

    fn calls(&self, op: GatewayOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }
}

macro_rules! harness_controls {
    ($ty:ty) => {
        impl $ty {
            /// Make `op` fail with `failure` until [`recover`](Self::recover).
            pub fn fail(&self, op: GatewayOp, failure: Failure) {
                lock(&self.harness.failures).insert(op, failure);
            }

            pub fn recover(&self, op: GatewayOp) {
                lock(&self.harness.failures).remove(&op);
            }

            /// Number of calls made to `op`, including failed ones.
            #[must_use]
            pub fn calls(&self, op: GatewayOp) -> usize {
                self.harness.calls(op)
            }

            /// Delay every call by `latency`.
            pub fn set_latency(&self, latency: Duration) {
                *lock(&self.harness.latency) = Some(latency);
            }

            /// Highest number of calls observed in flight at once.
            #[must_use]
            pub fn max_in_flight(&self) -> usize {
                self.harness.max_in_flight.load(Ordering::SeqCst)
            }
        }
    };
}

// =============================================================================
// Cart Gateway
// =============================================================================

#[derive(Debug, Default)]
struct CartServer {
    lines: Vec<CartItem>,
    discount: Option<Discount>,
    next_id: u64,
    rejected_variants: HashSet<VariantId>,
}

impl CartServer {
    fn next_id(&mut self) -> ItemId {
        self.next_id += 1;
        ItemId::new(format!("line-{}", self.next_id))
    }

    fn insert(&mut self, item: &NewCartItem, now: DateTime<Utc>) -> ItemId {
        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|line| line.matches(&item.variant_id, item.color.as_deref()))
        {
            line.quantity = line.quantity.saturating_add(item.quantity);
            line.updated_at = now;
            return line.id.clone();
        }
        let id = self.next_id();
        self.lines.push(CartItem::from_new(id.clone(), item, now));
        id
    }

    fn line_mut(&mut self, id: &ItemId) -> Result<&mut CartItem, GatewayError> {
        self.lines
            .iter_mut()
            .find(|line| line.id == *id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }
}

/// A cart API held in memory.
pub struct InMemoryCartGateway {
    clock: Arc<dyn Clock>,
    server: Mutex<CartServer>,
    harness: Harness,
}

harness_controls!(InMemoryCartGateway);

impl InMemoryCartGateway {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            server: Mutex::new(CartServer::default()),
            harness: Harness::default(),
        }
    }

    /// Put a line on the server directly, without counting a call.
    pub fn seed(&self, item: NewCartItem) -> ItemId {
        let now = self.clock.now();
        lock(&self.server).insert(&item, now)
    }

    /// Current server lines.
    #[must_use]
    pub fn lines(&self) -> Vec<CartItem> {
        lock(&self.server).lines.clone()
    }

    /// Reject rows of `variant` in batch merges.
    pub fn reject_variant(&self, variant: impl Into<VariantId>) {
        lock(&self.server).rejected_variants.insert(variant.into());
    }

    pub fn set_discount(&self, discount: Option<Discount>) {
        lock(&self.server).discount = discount;
    }
}

fn to_remote_line(item: &CartItem) -> RemoteCartLine {
    RemoteCartLine {
        id: item.id.to_string(),
        variant_id: item.variant_id.to_string(),
        quantity: i64::from(item.quantity),
        price: item.unit_price,
        assembly_required: item.assembly_required,
        assemble_charges: Some(item.assemble_charges),
        color: item.color.clone(),
        size: item.size.clone(),
        stock: item.stock.map(i64::from),
        created_at: item.created_at,
        updated_at: item.updated_at,
    }
}

#[async_trait]
impl CartGateway for InMemoryCartGateway {
    async fn fetch_cart(&self) -> Result<RemoteCart, GatewayError> {
        let _call = self.harness.enter(GatewayOp::FetchCart).await?;
        let server = lock(&self.server);
        Ok(RemoteCart {
            items: server.lines.iter().map(to_remote_line).collect(),
            discount: server.discount.clone(),
        })
    }

    async fn add_item(&self, item: &NewCartItem) -> Result<(), GatewayError> {
        let _call = self.harness.enter(GatewayOp::AddItem).await?;
        let now = self.clock.now();
        lock(&self.server).insert(item, now);
        Ok(())
    }

    async fn update_quantity(&self, item_id: &ItemId, quantity: u32) -> Result<(), GatewayError> {
        let _call = self.harness.enter(GatewayOp::UpdateQuantity).await?;
        let now = self.clock.now();
        let mut server = lock(&self.server);
        let line = server.line_mut(item_id)?;
        line.quantity = quantity;
        line.updated_at = now;
        Ok(())
    }

    async fn update_flag(&self, item_id: &ItemId, assembly_required: bool) -> Result<(), GatewayError> {
        let _call = self.harness.enter(GatewayOp::UpdateFlag).await?;
        let now = self.clock.now();
        let mut server = lock(&self.server);
        let line = server.line_mut(item_id)?;
        line.assembly_required = assembly_required;
        line.updated_at = now;
        Ok(())
    }

    async fn update_color(&self, item_id: &ItemId, color: Option<&str>) -> Result<(), GatewayError> {
        let _call = self.harness.enter(GatewayOp::UpdateColor).await?;
        let now = self.clock.now();
        let mut server = lock(&self.server);
        let line = server.line_mut(item_id)?;
        line.color = color.map(String::from);
        line.updated_at = now;
        Ok(())
    }

    async fn remove_item(&self, item_id: &ItemId) -> Result<(), GatewayError> {
        let _call = self.harness.enter(GatewayOp::RemoveItem).await?;
        let mut server = lock(&self.server);
        let before = server.lines.len();
        server.lines.retain(|line| line.id != *item_id);
        if server.lines.len() == before {
            return Err(GatewayError::NotFound(item_id.to_string()));
        }
        Ok(())
    }

    async fn clear_cart(&self) -> Result<(), GatewayError> {
        let _call = self.harness.enter(GatewayOp::ClearCart).await?;
        lock(&self.server).lines.clear();
        Ok(())
    }

    async fn merge_batch(&self, items: &[CartItem]) -> Result<MergeReport, GatewayError> {
        let _call = self.harness.enter(GatewayOp::MergeBatch).await?;
        let now = self.clock.now();
        let mut server = lock(&self.server);
        let mut report = MergeReport::default();

        for item in items {
            if server.rejected_variants.contains(&item.variant_id) {
                report.rejected.push(RejectedLine {
                    item_id: item.id.clone(),
                    reason: "Variant unavailable".to_string(),
                });
                continue;
            }
            let new = NewCartItem {
                variant_id: item.variant_id.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                assembly_required: item.assembly_required,
                assemble_charges: item.assemble_charges,
                color: item.color.clone(),
                size: item.size.clone(),
            };
            server.insert(&new, now);
        }
        Ok(report)
    }
}

// =============================================================================
// Wishlist Gateway
// =============================================================================

#[derive(Debug, Default)]
struct WishlistServer {
    lines: Vec<WishlistItem>,
    next_id: u64,
    rejected_variants: HashSet<VariantId>,
}

impl WishlistServer {
    fn insert(&mut self, item: &NewWishlistItem, now: DateTime<Utc>) {
        if let Some(line) = self.lines.iter_mut().find(|l| l.variant_id == item.variant_id) {
            line.unit_price = item.unit_price;
            line.updated_at = now;
            return;
        }
        self.next_id += 1;
        let id = ItemId::new(format!("wish-{}", self.next_id));
        self.lines.push(WishlistItem::from_new(id, item, now));
    }
}

/// A wishlist API held in memory.
pub struct InMemoryWishlistGateway {
    clock: Arc<dyn Clock>,
    server: Mutex<WishlistServer>,
    harness: Harness,
}

harness_controls!(InMemoryWishlistGateway);

impl InMemoryWishlistGateway {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            server: Mutex::new(WishlistServer::default()),
            harness: Harness::default(),
        }
    }

    /// Put a line on the server directly, without counting a call.
    pub fn seed(&self, item: NewWishlistItem) {
        let now = self.clock.now();
        lock(&self.server).insert(&item, now);
    }

    #[must_use]
    pub fn lines(&self) -> Vec<WishlistItem> {
        lock(&self.server).lines.clone()
    }

    pub fn reject_variant(&self, variant: impl Into<VariantId>) {
        lock(&self.server).rejected_variants.insert(variant.into());
    }
}

#[async_trait]
impl WishlistGateway for InMemoryWishlistGateway {
    async fn fetch_wishlist(&self) -> Result<Vec<RemoteWishlistLine>, GatewayError> {
        let _call = self.harness.enter(GatewayOp::FetchWishlist).await?;
        Ok(lock(&self.server)
            .lines
            .iter()
            .map(|item| RemoteWishlistLine {
                id: item.id.to_string(),
                variant_id: item.variant_id.to_string(),
                price: item.unit_price,
                color: item.color.clone(),
                size: item.size.clone(),
                created_at: item.created_at,
                updated_at: item.updated_at,
            })
            .collect())
    }

    async fn add_item(&self, item: &NewWishlistItem) -> Result<(), GatewayError> {
        let _call = self.harness.enter(GatewayOp::AddItem).await?;
        let now = self.clock.now();
        lock(&self.server).insert(item, now);
        Ok(())
    }

    async fn remove_item(&self, item_id: &ItemId) -> Result<(), GatewayError> {
        let _call = self.harness.enter(GatewayOp::RemoveItem).await?;
        let mut server = lock(&self.server);
        let before = server.lines.len();
        server.lines.retain(|line| line.id != *item_id);
        if server.lines.len() == before {
            return Err(GatewayError::NotFound(item_id.to_string()));
        }
        Ok(())
    }

    async fn clear_wishlist(&self) -> Result<(), GatewayError> {
        let _call = self.harness.enter(GatewayOp::ClearWishlist).await?;
        lock(&self.server).lines.clear();
        Ok(())
    }

    async fn merge_batch(&self, items: &[WishlistItem]) -> Result<MergeReport, GatewayError> {
        let _call = self.harness.enter(GatewayOp::MergeBatch).await?;
        let now = self.clock.now();
        let mut server = lock(&self.server);
        let mut report = MergeReport::default();
        for item in items {
            if server.rejected_variants.contains(&item.variant_id) {
                report.rejected.push(RejectedLine {
                    item_id: item.id.clone(),
                    reason: "Variant unavailable".to_string(),
                });
                continue;
            }
            let new = NewWishlistItem {
                variant_id: item.variant_id.clone(),
                unit_price: item.unit_price,
                color: item.color.clone(),
                size: item.size.clone(),
            };
            server.insert(&new, now);
        }
        Ok(report)
    }
}

/// A `NewCartItem` priced in whole currency units.
#[must_use]
pub fn new_item(variant: &str, quantity: u32, price: i64) -> NewCartItem {
    NewCartItem::new(variant, quantity, Decimal::from(price))
}
